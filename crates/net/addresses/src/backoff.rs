//! Exponential backoff with a cap.

use std::time::Duration;

/// Doubling backoff: `next = min(max(current, initial) * 2, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_secs(15 * 60))
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Backoff to apply after one more failure.
    pub fn next(&self, current: Duration) -> Duration {
        current.max(self.initial).saturating_mul(2).min(self.max)
    }
}
