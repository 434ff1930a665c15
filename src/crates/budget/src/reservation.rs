//! Provisional holds on budget capacity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provisional hold created before an operation's true cost is known
///
/// Every reservation is backed by exactly one budget, recorded at creation so
/// that release touches only that budget. A reservation ends in one of three
/// ways: released, consumed (the real usage is folded into `used_tokens`), or
/// expired and swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenReservation {
    /// Reservation identifier
    pub id: Uuid,
    /// Held token count
    pub tokens: u64,
    /// What the hold is for, free text
    pub purpose: String,
    /// Provider the work is pinned to, when known
    pub provider: Option<String>,
    /// Priority carried from the originating request
    pub priority: i32,
    /// The single budget whose `reserved_tokens` backs this hold
    pub budget_name: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry, `None` for holds that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenReservation {
    /// Whether the hold has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}
