//! The retry delay schedule named in `spec.md` §4.7 and tested as
//! "Backoff monotonicity" in `spec.md` §8: `base * (attempt + 1) * 2^attempt`,
//! capped at `retry_backoff_max`, with optional jitter. Implemented as a
//! `backoff::backoff::Backoff` so the retry loop itself can use
//! `backoff::future::retry` instead of a hand-rolled loop.

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct SpecBackoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    max_retries: u32,
    failures_so_far: u32,
}

impl SpecBackoff {
    pub fn new(base: Duration, max: Duration, jitter: bool, max_retries: u32) -> Self {
        Self { base, max, jitter, max_retries, failures_so_far: 0 }
    }

    fn raw_delay(&self, attempt: u32) -> Duration {
        let multiplier = (attempt as u64 + 1).saturating_mul(1u64 << attempt.min(32));
        let delay = self.base.saturating_mul(multiplier as u32);
        delay.min(self.max)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0)).min(self.max)
    }
}

impl Backoff for SpecBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.failures_so_far >= self.max_retries {
            return None;
        }
        let delay = self.with_jitter(self.raw_delay(self.failures_so_far));
        self.failures_so_far += 1;
        Some(delay)
    }

    fn reset(&mut self) {
        self.failures_so_far = 0;
    }
}
