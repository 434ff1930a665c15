//! Shared data model and provider contracts for tokenwise
//!
//! This crate defines the request/response value objects exchanged with the
//! orchestration layer, the additive token-usage accounting type, a
//! language-aware token estimator, and the traits through which external
//! provider and cost collaborators are injected.

pub mod error;
pub mod estimate;
pub mod request;
pub mod response;
pub mod traits;
pub mod types;
pub mod usage;

pub use error::{CoreError, Result};
pub use estimate::{estimate_request_tokens, estimate_tokens, task_overhead};
pub use request::{AiRequest, ResponseCallback};
pub use response::{AiResponse, ProviderReply};
pub use traits::{CostTracker, ProviderClient, ProviderResolver};
pub use types::{Priority, ProviderHealth, RequestStatus, TaskType};
pub use usage::TokenUsage;
