//! AI request model

use crate::response::AiResponse;
use crate::types::{Priority, RequestStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Callback invoked with the final response of an asynchronously submitted request
pub type ResponseCallback = Arc<dyn Fn(&AiResponse) + Send + Sync>;

/// A single unit of AI work
///
/// Requests are value objects: callers build one with the constructors below,
/// hand it to the orchestration layer, and never mutate it afterwards. Only the
/// orchestration layer updates `status` and `retry_count` on its own copies.
#[derive(Clone, Serialize, Deserialize)]
pub struct AiRequest {
    /// Unique request identifier
    pub id: Uuid,
    /// The kind of work requested
    pub task_type: TaskType,
    /// Free-text content (prompt, document, ...)
    pub content: String,
    /// Task-specific context (video info, style, character, ...)
    pub context: HashMap<String, Value>,
    /// Provider parameters (temperature, max output tokens, ...)
    pub parameters: HashMap<String, Value>,
    /// Preferred provider, honored when available
    pub provider: Option<String>,
    /// Scheduling priority
    pub priority: Priority,
    /// Per-attempt execution timeout
    pub timeout: Duration,
    /// Retries performed so far
    pub retry_count: u32,
    /// Maximum automatic retries
    pub max_retries: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: RequestStatus,
    /// Free-form annotations (optimization results land here)
    pub metadata: HashMap<String, Value>,
    /// Completion callback for asynchronous submissions
    #[serde(skip)]
    pub callback: Option<ResponseCallback>,
}

impl AiRequest {
    /// Create a request with defaults matching the service configuration
    pub fn new(task_type: TaskType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            content: content.into(),
            context: HashMap::new(),
            parameters: HashMap::new(),
            provider: None,
            priority: Priority::Normal,
            timeout: Duration::from_secs(30),
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            metadata: HashMap::new(),
            callback: None,
        }
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Add a provider parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Pin the request to a provider
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the automatic retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach a completion callback
    pub fn with_callback(mut self, callback: ResponseCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Text generation from a prompt
    pub fn text_generation(prompt: impl Into<String>) -> Self {
        Self::new(TaskType::TextGeneration, prompt)
    }

    /// Analysis of the supplied content
    pub fn content_analysis(content: impl Into<String>) -> Self {
        Self::new(TaskType::ContentAnalysis, content)
    }

    /// Commentary generation over video material
    pub fn commentary(video_info: Value, style: impl Into<String>) -> Self {
        let style = style.into();
        Self::new(
            TaskType::CommentaryGeneration,
            format!("Generate {style} commentary for the video"),
        )
        .with_context("video_info", video_info)
        .with_context("style", json!(style))
    }

    /// Monologue generation over video material
    pub fn monologue(
        video_info: Value,
        character: impl Into<String>,
        emotion: impl Into<String>,
    ) -> Self {
        let character = character.into();
        let emotion = emotion.into();
        Self::new(
            TaskType::MonologueGeneration,
            format!("Generate a {emotion} monologue for {character}"),
        )
        .with_context("video_info", video_info)
        .with_context("character", json!(character))
        .with_context("emotion", json!(emotion))
    }

    /// Subtitle generation for video material
    pub fn subtitle(video_info: Value, language: impl Into<String>) -> Self {
        let language = language.into();
        Self::new(
            TaskType::SubtitleGeneration,
            format!("Generate {language} subtitles for the video"),
        )
        .with_context("video_info", video_info)
        .with_context("language", json!(language))
    }

    /// Scene analysis of video material
    pub fn scene_analysis(video_info: Value, analysis_type: impl Into<String>) -> Self {
        let analysis_type = analysis_type.into();
        Self::new(
            TaskType::SceneAnalysis,
            format!("Run {analysis_type} scene analysis on the video"),
        )
        .with_context("video_info", video_info)
        .with_context("analysis_type", json!(analysis_type))
    }

    /// Whether automatic retries remain
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

impl std::fmt::Debug for AiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiRequest")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("content", &self.content)
            .field("context", &self.context)
            .field("parameters", &self.parameters)
            .field("provider", &self.provider)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("created_at", &self.created_at)
            .field("status", &self.status)
            .field("metadata", &self.metadata)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let request = AiRequest::text_generation("summarize this")
            .with_provider("openai")
            .with_priority(Priority::High)
            .with_timeout(Duration::from_secs(10))
            .with_max_retries(1)
            .with_parameter("temperature", json!(0.2));

        assert_eq!(request.task_type, TaskType::TextGeneration);
        assert_eq!(request.provider.as_deref(), Some("openai"));
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.timeout, Duration::from_secs(10));
        assert_eq!(request.max_retries, 1);
        assert_eq!(request.parameters["temperature"], json!(0.2));
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[test]
    fn test_commentary_context() {
        let request = AiRequest::commentary(json!({"duration": 120}), "humorous");
        assert_eq!(request.task_type, TaskType::CommentaryGeneration);
        assert_eq!(request.content, "Generate humorous commentary for the video");
        assert_eq!(request.context["video_info"], json!({"duration": 120}));
        assert_eq!(request.context["style"], json!("humorous"));
    }

    #[test]
    fn test_monologue_context() {
        let request = AiRequest::monologue(json!({"title": "trip"}), "narrator", "wistful");
        assert_eq!(request.context["character"], json!("narrator"));
        assert_eq!(request.context["emotion"], json!("wistful"));
    }

    #[test]
    fn test_retry_budget() {
        let mut request = AiRequest::text_generation("hi").with_max_retries(2);
        assert!(request.can_retry());
        request.retry_count = 2;
        assert!(!request.can_retry());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = AiRequest::text_generation("a");
        let b = AiRequest::text_generation("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serde_skips_callback() {
        let request =
            AiRequest::text_generation("hello").with_callback(Arc::new(|_response| {}));
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("callback"));
        let back: AiRequest = serde_json::from_str(&json).unwrap();
        assert!(back.callback.is_none());
        assert_eq!(back.id, request.id);
    }
}
