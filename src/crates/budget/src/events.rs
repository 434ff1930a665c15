//! Budget-side event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a threshold alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Severity assigned to a crossed threshold
    pub fn for_threshold(threshold: f64) -> Self {
        if threshold >= 1.0 {
            AlertLevel::Critical
        } else if threshold >= 0.9 {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        }
    }
}

/// A fired usage-threshold alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAlert {
    /// Severity
    pub level: AlertLevel,
    /// Human-readable description, names the budget
    pub message: String,
    /// Used tokens at firing time
    pub current_usage: u64,
    /// The budget's total allocation
    pub budget_limit: u64,
    /// The crossed threshold
    pub threshold: f64,
    /// Firing time
    pub timestamp: DateTime<Utc>,
}

/// Events published by the budget manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetEvent {
    /// A usage threshold was crossed
    ThresholdAlert { alert: TokenAlert },
    /// A budget's usage reached its full allocation
    BudgetExceeded { budget_name: String, used_tokens: u64 },
    /// A reservation was created
    ReservationCreated {
        reservation_id: Uuid,
        tokens: u64,
        purpose: String,
    },
    /// A reservation was released or swept
    ReservationReleased { reservation_id: Uuid, tokens: u64 },
    /// Usage was folded into a budget
    TokensConsumed {
        provider: String,
        total_tokens: u64,
        cost: f64,
    },
}
