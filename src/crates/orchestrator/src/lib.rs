//! Request orchestration for AI providers
//!
//! This crate ties the token budget layer to a bounded worker pool. The
//! [`AiService`] facade validates, optimizes, and reserves tokens for each
//! request before dispatch, then settles the reservation when the worker
//! finishes. Admission control, retry, provider health probing, and result
//! retention all live here.

pub mod config;
pub mod events;
pub mod pool;
pub mod retry;
pub mod service;
pub mod stats;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;
use uuid::Uuid;

use budget::BudgetError;

/// Errors surfaced by the orchestration layer
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request failed pre-dispatch validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Combined budget capacity cannot cover the estimated tokens
    #[error("Token budget insufficient: {0}")]
    BudgetUnavailable(String),

    /// Reservation was refused by the budget manager
    #[error(transparent)]
    Reservation(#[from] BudgetError),

    /// Projected spend would break the monetary budget
    #[error("Cost budget exceeded: estimated cost {estimated_cost:.4}")]
    CostBudgetExceeded { estimated_cost: f64 },

    /// Worker pool is at capacity
    #[error("Worker pool saturated: {active}/{max} workers busy")]
    PoolSaturated { active: usize, max: usize },

    /// A request with this id is already active
    #[error("Request {0} is already being processed")]
    DuplicateRequest(Uuid),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, ServiceError>;

pub use config::ServiceConfig;
pub use events::{event_stream, PoolEvent, ServiceEvent};
pub use pool::{PoolStatus, TaskHandle, WorkerPool};
pub use retry::RetryPolicy;
pub use service::AiService;
pub use stats::{CompletedRecord, UsageStats};
pub use worker::{TaskOutcome, Worker};
