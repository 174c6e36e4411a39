//! Sliding-window failure tracking and graceful-degradation hysteresis
//! (`spec.md` §4.7).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-component sliding window of recent outcomes.
pub struct FailureTracker {
    window: VecDeque<bool>,
    capacity: usize,
}

impl FailureTracker {
    pub fn new(capacity: usize) -> Self {
        Self { window: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn record(&mut self, succeeded: bool) {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(succeeded);
    }

    /// Fraction of recorded outcomes that failed, in `[0.0, 1.0]`. `0.0`
    /// when the window is empty (no evidence of failure yet).
    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !*ok).count();
        failures as f64 / self.window.len() as f64
    }
}

/// Tracks consecutive successes within a rolling time window, used to decide
/// when to exit degraded mode (`spec.md` §4.7: `RecoverySuccessThreshold`
/// consecutive successes within `RecoveryWindow`).
pub struct RecoveryTracker {
    success_threshold: u32,
    window: Duration,
    consecutive_successes: u32,
    window_start: Option<Instant>,
}

impl RecoveryTracker {
    pub fn new(success_threshold: u32, window: Duration) -> Self {
        Self { success_threshold, window, consecutive_successes: 0, window_start: None }
    }

    /// Returns `true` once the recovery threshold has been met within the
    /// window. Resets on any failure, or if the window elapsed before the
    /// threshold was reached.
    pub fn record(&mut self, succeeded: bool, now: Instant) -> bool {
        if !succeeded {
            self.consecutive_successes = 0;
            self.window_start = None;
            return false;
        }

        match self.window_start {
            Some(start) if now.duration_since(start) > self.window => {
                self.window_start = Some(now);
                self.consecutive_successes = 1;
            }
            Some(_) => self.consecutive_successes += 1,
            None => {
                self.window_start = Some(now);
                self.consecutive_successes = 1;
            }
        }

        self.consecutive_successes >= self.success_threshold
    }

    pub fn reset(&mut self) {
        self.consecutive_successes = 0;
        self.window_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_reflects_the_window() {
        let mut tracker = FailureTracker::new(4);
        tracker.record(true);
        tracker.record(false);
        tracker.record(false);
        tracker.record(true);
        assert_eq!(tracker.failure_rate(), 0.5);
    }

    #[test]
    fn failure_rate_only_reflects_the_most_recent_window() {
        let mut tracker = FailureTracker::new(2);
        tracker.record(false);
        tracker.record(false);
        tracker.record(true);
        tracker.record(true);
        assert_eq!(tracker.failure_rate(), 0.0);
    }

    #[test]
    fn recovery_tracker_fires_after_consecutive_successes_within_window() {
        let mut tracker = RecoveryTracker::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!tracker.record(true, t0));
        assert!(!tracker.record(true, t0 + Duration::from_secs(1)));
        assert!(tracker.record(true, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn recovery_tracker_resets_on_failure() {
        let mut tracker = RecoveryTracker::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!tracker.record(true, t0));
        assert!(!tracker.record(false, t0 + Duration::from_secs(1)));
        assert!(!tracker.record(true, t0 + Duration::from_secs(2)));
        assert!(tracker.record(true, t0 + Duration::from_secs(3)));
    }
}
