//! Error types for provider interactions

use thiserror::Error;

/// Errors surfaced by provider resolution and provider client calls
#[derive(Debug, Error)]
pub enum CoreError {
    /// No provider could be resolved for a request
    #[error("No AI provider available")]
    NoProviderAvailable,

    /// The provider client call failed
    #[error("Provider call failed: {0}")]
    Provider(String),

    /// The provider call exceeded the request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The request was malformed for the target provider
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::NoProviderAvailable | CoreError::Provider(_) | CoreError::Timeout(_)
        )
    }
}

/// Result type for provider-facing operations
pub type Result<T> = std::result::Result<T, CoreError>;
