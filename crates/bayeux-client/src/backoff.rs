//! Geometric backoff for connect retries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Tracks consecutive failures and yields `min(base * 2^(n-1), cap)` as the
/// extra delay before the next attempt. Reset on any success.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: AtomicU32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl Backoff {
    /// Create a backoff with the given base delay and cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: AtomicU32::new(0),
        }
    }

    /// Record a failure and return the delay to apply before retrying.
    pub fn next_delay(&self) -> Duration {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.delay_for(failures)
    }

    /// The delay the current failure count implies, without recording a new
    /// failure.
    pub fn current(&self) -> Duration {
        self.delay_for(self.failures.load(Ordering::Relaxed))
    }

    /// Number of consecutive failures recorded.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Clear the failure count after a success.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(16);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}
