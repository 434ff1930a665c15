//! Orchestration events
//!
//! Two broadcast channels exist: [`PoolEvent`] for worker-level progress
//! inside the pool, and [`ServiceEvent`] for the facade-level lifecycle
//! observers subscribe to. The facade forwards pool progress onto its own
//! channel so callers only need one subscription.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use tokenwise_core::AiResponse;

use crate::stats::UsageStats;

/// Lifecycle events emitted by [`AiService`](crate::AiService)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    /// A worker began executing the request
    RequestStarted { request_id: Uuid },
    /// Execution progress in `[0.0, 1.0]`
    RequestProgress { request_id: Uuid, progress: f64 },
    /// The request finished and produced a response
    RequestCompleted {
        request_id: Uuid,
        response: AiResponse,
    },
    /// The request failed terminally (validation, admission, or exhausted retries)
    RequestFailed { request_id: Uuid, error: String },
    /// The request was cancelled before completion
    RequestCancelled { request_id: Uuid },
    /// Periodic snapshot of aggregate usage statistics
    StatsSnapshot { stats: UsageStats },
    /// A provider's availability changed
    HealthChanged { provider: String, available: bool },
    /// Accumulated cost crossed the alert fraction of the budget limit
    CostAlert {
        current_cost: f64,
        budget_limit: f64,
    },
    /// Accumulated cost crossed the budget limit itself
    CostBudgetExceeded {
        current_cost: f64,
        budget_limit: f64,
    },
}

/// Events emitted by [`WorkerPool`](crate::WorkerPool)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Occupancy changed (admission or departure)
    StatusChanged {
        active: usize,
        max_workers: usize,
        utilization: f64,
    },
    /// A worker began executing
    WorkerStarted { request_id: Uuid },
    /// A worker reported progress
    WorkerProgress { request_id: Uuid, progress: f64 },
    /// A worker observed its cancellation flag and stopped
    WorkerCancelled { request_id: Uuid },
}

/// Adapt a broadcast subscription into a `Stream`, dropping lagged gaps
pub fn event_stream(
    receiver: broadcast::Receiver<ServiceEvent>,
) -> impl Stream<Item = ServiceEvent> {
    BroadcastStream::new(receiver).filter_map(|item| item.ok())
}
