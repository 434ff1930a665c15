//! Core enums and provider health snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of AI work a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Free-form text generation from a prompt
    TextGeneration,
    /// Structured analysis of supplied content
    ContentAnalysis,
    /// Commentary generation over video material
    CommentaryGeneration,
    /// First-person monologue generation over video material
    MonologueGeneration,
    /// Scene-level analysis of video material
    SceneAnalysis,
    /// Subtitle generation for video material
    SubtitleGeneration,
    /// Editing suggestions for video material
    EditingSuggestion,
    /// Content classification
    ContentClassification,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::TextGeneration => "text_generation",
            TaskType::ContentAnalysis => "content_analysis",
            TaskType::CommentaryGeneration => "commentary_generation",
            TaskType::MonologueGeneration => "monologue_generation",
            TaskType::SceneAnalysis => "scene_analysis",
            TaskType::SubtitleGeneration => "subtitle_generation",
            TaskType::EditingSuggestion => "editing_suggestion",
            TaskType::ContentClassification => "content_classification",
        };
        write!(f, "{}", name)
    }
}

/// Scheduling priority for a request
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work
    Low = 0,
    /// Default priority
    #[default]
    Normal = 1,
    /// User-visible work
    High = 2,
    /// Latency-critical work
    Urgent = 3,
}

/// Lifecycle status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created but not yet dispatched
    Pending,
    /// Currently executing
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl RequestStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "Pending"),
            RequestStatus::Processing => write!(f, "Processing"),
            RequestStatus::Completed => write!(f, "Completed"),
            RequestStatus::Failed => write!(f, "Failed"),
            RequestStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Point-in-time availability snapshot for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Provider identifier
    pub provider: String,
    /// Whether the last probe succeeded
    pub available: bool,
    /// When the last probe ran
    pub last_checked: DateTime<Utc>,
    /// Consecutive failed probes
    pub consecutive_failures: u32,
    /// Error from the most recent failed probe
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// Create a health record for a provider that has not been probed yet
    pub fn unknown(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            available: false,
            last_checked: Utc::now(),
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Record a successful probe
    pub fn mark_available(&mut self) {
        self.available = true;
        self.last_checked = Utc::now();
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Record a failed probe
    pub fn mark_unavailable(&mut self, error: Option<String>) {
        self.available = false;
        self.last_checked = Utc::now();
        self.consecutive_failures += 1;
        self.last_error = error;
    }
}
