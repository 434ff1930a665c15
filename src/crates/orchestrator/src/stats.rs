//! Aggregate usage statistics and completed-request history

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tokenwise_core::{AiResponse, TaskType};

/// One completed request in the retained history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub request_id: Uuid,
    pub task_type: TaskType,
    pub provider: String,
    pub success: bool,
    pub processing_time: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate counters folded over every recorded response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub tokens_by_provider: HashMap<String, u64>,
    pub cost_by_provider: HashMap<String, f64>,
    pub requests_by_provider: HashMap<String, u64>,
    /// Running mean over all recorded responses, successes and failures alike
    pub average_processing_time: Duration,
}

impl UsageStats {
    /// Fold one response into the aggregates
    pub fn record(&mut self, response: &AiResponse) {
        self.total_requests += 1;
        if response.success {
            self.successful_requests += 1;
            if let Some(usage) = &response.usage {
                self.total_tokens += usage.total_tokens;
                if !response.provider.is_empty() {
                    *self
                        .tokens_by_provider
                        .entry(response.provider.clone())
                        .or_default() += usage.total_tokens;
                    *self
                        .cost_by_provider
                        .entry(response.provider.clone())
                        .or_default() += response.cost;
                }
            }
            self.total_cost += response.cost;
        } else {
            self.failed_requests += 1;
        }
        if !response.provider.is_empty() {
            *self
                .requests_by_provider
                .entry(response.provider.clone())
                .or_default() += 1;
        }

        let accumulated = self.average_processing_time.as_secs_f64()
            * (self.total_requests - 1) as f64
            + response.processing_time.as_secs_f64();
        self.average_processing_time =
            Duration::from_secs_f64(accumulated / self.total_requests as f64);
    }

    /// Fraction of recorded requests that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }
}
