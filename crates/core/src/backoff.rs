//! Exponential retry backoff.

use std::time::Duration;
use time::OffsetDateTime;

/// Exponential backoff with a fixed base, a cap, and a retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Number of retryable failures tolerated before a task fails permanently.
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
        }
    }

    /// Delay after the failure that found `retry_count` earlier failures.
    ///
    /// `base * 2^retry_count`, saturating, capped at `max`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// When the task becomes eligible again.
    pub fn next_run_at(&self, now: OffsetDateTime, retry_count: u32) -> OffsetDateTime {
        now + self.delay(retry_count)
    }

    /// Whether a task that has already failed `retry_count` times may retry once more.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            max_retries: 5,
        }
    }
}
