//! AI response model

use crate::usage::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// The outcome of one request attempt, produced exactly once per attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    /// The request this response answers
    pub request_id: Uuid,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Generated content (empty on failure)
    pub content: String,
    /// Human-readable failure description (empty on success)
    pub error_message: String,
    /// Token usage reported by the provider, when available
    pub usage: Option<TokenUsage>,
    /// Free-form annotations
    pub metadata: HashMap<String, Value>,
    /// The provider that served the attempt
    pub provider: String,
    /// Wall-clock execution time of the attempt
    pub processing_time: Duration,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Monetary cost of the attempt
    pub cost: f64,
}

impl AiResponse {
    /// A successful response
    pub fn succeeded(request_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            request_id,
            success: true,
            content: content.into(),
            error_message: String::new(),
            usage: None,
            metadata: HashMap::new(),
            provider: String::new(),
            processing_time: Duration::ZERO,
            created_at: Utc::now(),
            cost: 0.0,
        }
    }

    /// A failed response carrying a human-readable error
    pub fn failed(request_id: Uuid, error_message: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            content: String::new(),
            error_message: error_message.into(),
            usage: None,
            metadata: HashMap::new(),
            provider: String::new(),
            processing_time: Duration::ZERO,
            created_at: Utc::now(),
            cost: 0.0,
        }
    }

    /// Attach token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Record the serving provider
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Record the attempt duration
    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = processing_time;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What a provider client returns from one task call
///
/// Clients know nothing about request ids, retries, or costs; the worker
/// folds a reply into an [`AiResponse`] and stamps the orchestration fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderReply {
    /// Generated content
    pub content: String,
    /// Token usage reported by the provider
    pub usage: Option<TokenUsage>,
    /// Provider-specific annotations
    pub metadata: HashMap<String, Value>,
}

impl ProviderReply {
    /// A reply with content only
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
