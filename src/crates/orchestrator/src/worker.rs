//! Task execution worker
//!
//! A [`Worker`] owns one request for its whole execution: it resolves a
//! provider, dispatches the call under the request's timeout, reports
//! progress through pool events, and settles cost bookkeeping. Execution
//! failures never escape as errors; they become failed [`AiResponse`]s so
//! the caller always receives a terminal outcome.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tokenwise_core::{
    AiRequest, AiResponse, CoreError, CostTracker, ProviderClient, ProviderReply,
    ProviderResolver, TaskType,
};

use crate::events::PoolEvent;

/// Terminal outcome of one worker run
#[derive(Debug)]
pub enum TaskOutcome {
    /// The request ran to completion, successfully or not
    Completed(AiResponse),
    /// The cancellation flag was observed before completion
    Cancelled,
}

/// Executes a single request against a resolved provider
pub struct Worker {
    request: AiRequest,
    resolver: Arc<dyn ProviderResolver>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
    cancel: CancellationToken,
    events: broadcast::Sender<PoolEvent>,
}

impl Worker {
    pub fn new(
        request: AiRequest,
        resolver: Arc<dyn ProviderResolver>,
        cost_tracker: Option<Arc<dyn CostTracker>>,
        cancel: CancellationToken,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        Self {
            request,
            resolver,
            cost_tracker,
            cancel,
            events,
        }
    }

    /// Run the request to a terminal outcome
    pub async fn run(self) -> TaskOutcome {
        let request_id = self.request.id;
        let _ = self.events.send(PoolEvent::WorkerStarted { request_id });
        let started = Instant::now();

        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(%request_id, "worker observed cancellation");
                TaskOutcome::Cancelled
            }
            response = self.execute(started) => TaskOutcome::Completed(response),
        }
    }

    async fn execute(&self, started: Instant) -> AiResponse {
        match self.attempt().await {
            Ok(response) => response.with_processing_time(started.elapsed()),
            Err(err) => {
                error!(request_id = %self.request.id, error = %err, "task execution failed");
                AiResponse::failed(self.request.id, err.to_string())
                    .with_processing_time(started.elapsed())
            }
        }
    }

    async fn attempt(&self) -> tokenwise_core::Result<AiResponse> {
        let provider = self
            .resolve_provider()
            .await
            .ok_or(CoreError::NoProviderAvailable)?;
        debug!(
            request_id = %self.request.id,
            provider = %provider,
            task_type = %self.request.task_type,
            "dispatching request"
        );
        self.progress(0.2);

        let client = self
            .resolver
            .client(&provider)
            .ok_or_else(|| CoreError::Provider(format!("no client registered for '{provider}'")))?;
        let reply = tokio::time::timeout(self.request.timeout, self.dispatch(client.as_ref()))
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "provider call exceeded {}s",
                    self.request.timeout.as_secs()
                ))
            })??;
        self.progress(0.9);

        let mut response =
            AiResponse::succeeded(self.request.id, reply.content).with_provider(provider.clone());
        response.metadata = reply.metadata;
        if let Some(usage) = reply.usage {
            response = response.with_usage(usage);
            if let Some(tracker) = &self.cost_tracker {
                let cost = tracker.calculate_cost(&provider, &usage);
                tracker.record_usage(&provider, &usage, cost);
                response.cost = cost;
            }
        }
        self.progress(1.0);
        Ok(response)
    }

    /// Explicit provider when still available, otherwise the resolver's
    /// pick, otherwise the first provider it lists
    async fn resolve_provider(&self) -> Option<String> {
        if let Some(provider) = &self.request.provider {
            if self.resolver.is_available(provider).await {
                return Some(provider.clone());
            }
            warn!(
                request_id = %self.request.id,
                provider = %provider,
                "requested provider unavailable, falling back"
            );
        }
        if let Some(best) = self.resolver.best_provider(&self.request).await {
            return Some(best);
        }
        self.resolver.available_providers().into_iter().next()
    }

    async fn dispatch(&self, client: &dyn ProviderClient) -> tokenwise_core::Result<ProviderReply> {
        match self.request.task_type {
            TaskType::ContentAnalysis => {
                client
                    .analyze_content(&self.request.content, &self.request.parameters)
                    .await
            }
            TaskType::CommentaryGeneration => {
                let video_info = self.context_object("video_info");
                let style = self.context_str("style", "professional");
                client.generate_commentary(&video_info, &style).await
            }
            TaskType::MonologueGeneration => {
                let video_info = self.context_object("video_info");
                let character = self.context_str("character", "narrator");
                let emotion = self.context_str("emotion", "calm");
                client
                    .generate_monologue(&video_info, &character, &emotion)
                    .await
            }
            _ => {
                client
                    .generate_text(&self.request.content, &self.request.parameters)
                    .await
            }
        }
    }

    fn context_object(&self, key: &str) -> Value {
        self.request
            .context
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    fn context_str(&self, key: &str, fallback: &str) -> String {
        self.request
            .context
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    }

    fn progress(&self, progress: f64) {
        let _ = self.events.send(PoolEvent::WorkerProgress {
            request_id: self.request.id,
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockClient, MockResolver};
    use std::time::Duration;

    fn channel() -> (broadcast::Sender<PoolEvent>, broadcast::Receiver<PoolEvent>) {
        broadcast::channel(64)
    }

    fn completed(outcome: TaskOutcome) -> AiResponse {
        match outcome {
            TaskOutcome::Completed(response) => response,
            TaskOutcome::Cancelled => panic!("worker was cancelled"),
        }
    }

    #[tokio::test]
    async fn successful_run_reports_progress_and_cost() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let tracker = testing::tracker();
        let (tx, mut rx) = channel();

        let request = AiRequest::text_generation("hello world");
        let request_id = request.id;
        let worker = Worker::new(
            request,
            resolver,
            Some(tracker.clone()),
            CancellationToken::new(),
            tx,
        );

        let response = completed(worker.run().await);
        assert!(response.success);
        assert_eq!(response.provider, "openai");
        assert_eq!(response.usage.unwrap().total_tokens, 30);
        assert!((response.cost - 0.03).abs() < 1e-9);
        assert_eq!(tracker.recorded.lock().len(), 1);

        let events = testing::drain(&mut rx);
        assert!(matches!(
            events.first(),
            Some(PoolEvent::WorkerStarted { request_id: id }) if *id == request_id
        ));
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|event| match event {
                PoolEvent::WorkerProgress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0.2, 0.9, 1.0]);
    }

    #[tokio::test]
    async fn explicit_provider_wins_when_available() {
        let client = MockClient::succeed();
        let resolver = Arc::new(MockResolver {
            providers: vec!["openai".into(), "claude".into()],
            best: Some("openai".into()),
            client: client.clone(),
        });
        let (tx, _rx) = channel();

        let request = AiRequest::text_generation("hi").with_provider("claude");
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        let response = completed(worker.run().await);
        assert_eq!(response.provider, "claude");
    }

    #[tokio::test]
    async fn unavailable_provider_falls_back_to_best() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::text_generation("hi").with_provider("gone");
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        let response = completed(worker.run().await);
        assert_eq!(response.provider, "openai");
    }

    #[tokio::test]
    async fn first_listed_provider_is_last_resort() {
        let client = MockClient::succeed();
        let resolver = Arc::new(MockResolver {
            providers: vec!["claude".into()],
            best: None,
            client: client.clone(),
        });
        let (tx, _rx) = channel();

        let worker = Worker::new(
            AiRequest::text_generation("hi"),
            resolver,
            None,
            CancellationToken::new(),
            tx,
        );
        let response = completed(worker.run().await);
        assert_eq!(response.provider, "claude");
    }

    #[tokio::test]
    async fn no_providers_fails_cleanly() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&[], &client);
        let (tx, _rx) = channel();

        let worker = Worker::new(
            AiRequest::text_generation("hi"),
            resolver,
            None,
            CancellationToken::new(),
            tx,
        );
        let response = completed(worker.run().await);
        assert!(!response.success);
        assert_eq!(response.error_message, "No AI provider available");
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_errors_become_failed_responses() {
        let client = MockClient::fail("rate limited");
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let worker = Worker::new(
            AiRequest::text_generation("hi"),
            resolver,
            None,
            CancellationToken::new(),
            tx,
        );
        let response = completed(worker.run().await);
        assert!(!response.success);
        assert!(response.error_message.contains("rate limited"));
        assert!(response.usage.is_none());
        assert_eq!(response.cost, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::text_generation("hi").with_timeout(Duration::from_secs(5));
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        let response = completed(worker.run().await);
        assert!(!response.success);
        assert!(response.error_message.starts_with("Request timeout"));
    }

    #[tokio::test]
    async fn cancellation_preempts_execution() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();

        let worker = Worker::new(
            AiRequest::text_generation("hi"),
            resolver,
            None,
            cancel.clone(),
            tx,
        );
        let handle = tokio::spawn(worker.run());
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(matches!(handle.await.unwrap(), TaskOutcome::Cancelled));
    }

    #[tokio::test]
    async fn commentary_dispatch_reads_context() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::commentary(serde_json::json!({"title": "clip"}), "energetic");
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        completed(worker.run().await);
        assert_eq!(
            client.calls.lock().as_slice(),
            ["generate_commentary:energetic"]
        );
    }

    #[tokio::test]
    async fn monologue_dispatch_applies_defaults() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::new(TaskType::MonologueGeneration, "");
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        completed(worker.run().await);
        assert_eq!(
            client.calls.lock().as_slice(),
            ["generate_monologue:narrator:calm"]
        );
    }

    #[tokio::test]
    async fn unmapped_task_types_use_text_generation() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::new(TaskType::SubtitleGeneration, "transcribe this");
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        completed(worker.run().await);
        assert_eq!(client.calls.lock().as_slice(), ["generate_text"]);
    }

    #[tokio::test]
    async fn response_carries_request_id() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let (tx, _rx) = channel();

        let request = AiRequest::text_generation("hi");
        let id = request.id;
        let worker = Worker::new(request, resolver, None, CancellationToken::new(), tx);
        let response = completed(worker.run().await);
        assert_eq!(response.request_id, id);
    }
}
