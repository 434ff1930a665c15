//! Shared mocks for unit tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use tokenwise_core::{
    AiRequest, CoreError, CostTracker, ProviderClient, ProviderReply, ProviderResolver,
    Result as CoreResult, TokenUsage,
};

/// What the mock client does when a request reaches it
pub(crate) enum Behavior {
    Succeed,
    Fail(String),
    Hang,
}

pub(crate) struct MockClient {
    pub behavior: Behavior,
    pub calls: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn succeed() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Succeed,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Fail(message.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn hang() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Hang,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn respond(&self, label: String) -> CoreResult<ProviderReply> {
        self.calls.lock().push(label);
        match &self.behavior {
            Behavior::Succeed => {
                Ok(ProviderReply::new("generated").with_usage(TokenUsage::new(10, 20)))
            }
            Behavior::Fail(message) => Err(CoreError::Provider(message.clone())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn generate_text(
        &self,
        _prompt: &str,
        _parameters: &HashMap<String, Value>,
    ) -> CoreResult<ProviderReply> {
        self.respond("generate_text".to_string()).await
    }

    async fn analyze_content(
        &self,
        _content: &str,
        _parameters: &HashMap<String, Value>,
    ) -> CoreResult<ProviderReply> {
        self.respond("analyze_content".to_string()).await
    }

    async fn generate_commentary(
        &self,
        _video_info: &Value,
        style: &str,
    ) -> CoreResult<ProviderReply> {
        self.respond(format!("generate_commentary:{style}")).await
    }

    async fn generate_monologue(
        &self,
        _video_info: &Value,
        character: &str,
        emotion: &str,
    ) -> CoreResult<ProviderReply> {
        self.respond(format!("generate_monologue:{character}:{emotion}"))
            .await
    }
}

pub(crate) struct MockResolver {
    pub providers: Vec<String>,
    pub best: Option<String>,
    pub client: Arc<MockClient>,
}

pub(crate) fn resolver(providers: &[&str], client: &Arc<MockClient>) -> Arc<MockResolver> {
    Arc::new(MockResolver {
        providers: providers.iter().map(ToString::to_string).collect(),
        best: providers.first().map(ToString::to_string),
        client: client.clone(),
    })
}

#[async_trait]
impl ProviderResolver for MockResolver {
    async fn is_available(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }

    async fn best_provider(&self, _request: &AiRequest) -> Option<String> {
        self.best.clone()
    }

    fn available_providers(&self) -> Vec<String> {
        self.providers.clone()
    }

    fn client(&self, provider: &str) -> Option<Arc<dyn ProviderClient>> {
        if self.providers.iter().any(|p| p == provider) {
            Some(self.client.clone() as Arc<dyn ProviderClient>)
        } else {
            None
        }
    }
}

pub(crate) struct RecordingTracker {
    pub rate: f64,
    pub limit: f64,
    pub recorded: Mutex<Vec<(String, u64, f64)>>,
}

pub(crate) fn tracker() -> Arc<RecordingTracker> {
    Arc::new(RecordingTracker {
        rate: 0.001,
        limit: f64::MAX,
        recorded: Mutex::new(Vec::new()),
    })
}

pub(crate) fn tracker_with_limit(limit: f64) -> Arc<RecordingTracker> {
    Arc::new(RecordingTracker {
        rate: 0.001,
        limit,
        recorded: Mutex::new(Vec::new()),
    })
}

impl CostTracker for RecordingTracker {
    fn calculate_cost(&self, _provider: &str, usage: &TokenUsage) -> f64 {
        usage.total_tokens as f64 * self.rate
    }

    fn record_usage(&self, provider: &str, usage: &TokenUsage, cost: f64) {
        self.recorded
            .lock()
            .push((provider.to_string(), usage.total_tokens, cost));
    }

    fn check_budget_limit(&self, estimated_cost: f64) -> bool {
        estimated_cost <= self.limit
    }
}

/// Collect everything currently buffered in a broadcast receiver
pub(crate) fn drain<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        out.push(event);
    }
    out
}
