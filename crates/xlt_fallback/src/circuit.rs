//! Per-component circuit breaker, orthogonal to graceful degradation
//! (`spec.md` §4.7): closed→open after consecutive failures, open→half-open
//! after a recovery timeout, half-open→closed after consecutive successes
//! (or back to open on a single failure).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    state: CircuitState,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_threshold,
            recovery_timeout,
            success_threshold,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call should be attempted right now. Transitions `Open` to
    /// `HalfOpen` as a side effect once the recovery timeout has elapsed.
    pub fn allow_request(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|at| now.duration_since(at)).unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns `true` if this outcome just opened the circuit (so the
    /// caller can publish `CircuitOpened` exactly once).
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_successes = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.open(now);
                true
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.open(now);
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        }
    }

    /// Returns `true` if this outcome just closed the circuit (so the
    /// caller can publish `CircuitClosed` exactly once).
    pub fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.success_threshold {
                    self.state = CircuitState::Closed;
                    self.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::Closed | CircuitState::Open => false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }
}
