//! Budget manager tuning

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_budget_tokens() -> u64 {
    1_000_000
}

fn default_reservation_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_history_capacity() -> usize {
    10_000
}

fn default_reservation_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_cache_sweep_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_event_capacity() -> usize {
    100
}

/// Tuning knobs for [`TokenBudgetManager`](crate::TokenBudgetManager)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Allocation used when a default budget has to be created
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: u64,
    /// Expiry applied to reservations created without an explicit one
    #[serde(default = "default_reservation_ttl")]
    pub default_reservation_ttl: Duration,
    /// Expiry applied to cached token sequences
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    /// Usage-history ring capacity
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// How often expired reservations are swept
    #[serde(default = "default_reservation_sweep_interval")]
    pub reservation_sweep_interval: Duration,
    /// How often expired cache entries are swept
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval: Duration,
    /// Broadcast channel capacity for budget events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_budget_tokens: default_budget_tokens(),
            default_reservation_ttl: default_reservation_ttl(),
            cache_ttl: default_cache_ttl(),
            history_capacity: default_history_capacity(),
            reservation_sweep_interval: default_reservation_sweep_interval(),
            cache_sweep_interval: default_cache_sweep_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl BudgetConfig {
    /// Set the default budget allocation
    pub fn with_default_budget_tokens(mut self, tokens: u64) -> Self {
        self.default_budget_tokens = tokens;
        self
    }

    /// Set the default reservation expiry
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.default_reservation_ttl = ttl;
        self
    }

    /// Set the token-cache expiry
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the usage-history ring capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}
