//! Contracts for external collaborators
//!
//! The orchestration core never talks to AI vendors directly. Provider
//! discovery, the per-provider clients, and monetary cost accounting are all
//! reached through these traits, injected once at construction.

use crate::error::Result;
use crate::request::AiRequest;
use crate::response::ProviderReply;
use crate::usage::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Discovers providers and hands out their clients
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    /// Whether the named provider is currently usable
    async fn is_available(&self, provider: &str) -> bool;

    /// The provider best suited to the request, when one can be ranked
    async fn best_provider(&self, request: &AiRequest) -> Option<String>;

    /// All providers known to the resolver, available or not
    fn available_providers(&self) -> Vec<String>;

    /// The client for a named provider
    fn client(&self, provider: &str) -> Option<Arc<dyn ProviderClient>>;
}

/// One provider's task-dispatched call surface
///
/// Every call returns a [`ProviderReply`]; implementations report failures
/// through [`CoreError`](crate::CoreError) and never panic.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Generate text from a prompt
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<ProviderReply>;

    /// Analyze the supplied content
    async fn analyze_content(
        &self,
        content: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<ProviderReply>;

    /// Generate commentary over video material
    async fn generate_commentary(&self, video_info: &Value, style: &str) -> Result<ProviderReply>;

    /// Generate a monologue over video material
    async fn generate_monologue(
        &self,
        video_info: &Value,
        character: &str,
        emotion: &str,
    ) -> Result<ProviderReply>;
}

/// Monetary cost accounting, kept outside the token-budget domain
pub trait CostTracker: Send + Sync {
    /// Price a call from its reported usage
    fn calculate_cost(&self, provider: &str, usage: &TokenUsage) -> f64;

    /// Record a priced call
    fn record_usage(&self, provider: &str, usage: &TokenUsage, cost: f64);

    /// Whether spending `estimated_cost` would stay inside the cost budget
    fn check_budget_limit(&self, estimated_cost: f64) -> bool;
}
