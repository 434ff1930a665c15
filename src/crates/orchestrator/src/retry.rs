//! Retry backoff policy
//!
//! Failed requests are resubmitted with exponentially growing delays:
//! `base_delay * 2^retry_count`, capped at `max_delay`. The schedule is
//! deterministic so observers can reason about exact resubmission times.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deterministic exponential backoff for request resubmission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given base delay and the default cap
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before dispatching a request whose retry counter has already
    /// been incremented to `retry_count`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
