//! Service configuration
//!
//! Loaded from a YAML file, overridden by `TOKENWISE_*` environment
//! variables, then validated. All duration-like settings are stored in
//! explicit units and exposed as [`Duration`] accessors.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, ServiceError};

fn default_max_workers() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_budget_limit() -> f64 {
    1000.0
}

fn default_cost_alert_threshold() -> f64 {
    0.8
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_health_interval_secs() -> u64 {
    300
}

fn default_eviction_interval_secs() -> u64 {
    3600
}

fn default_result_ttl_secs() -> u64 {
    3600
}

fn default_history_capacity() -> usize {
    1000
}

fn default_budget_tokens() -> u64 {
    1_000_000
}

fn default_budget_period() -> String {
    "monthly".to_string()
}

/// Configuration for [`AiService`](crate::AiService)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum number of concurrently executing requests
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Timeout applied to requests submitted with a zero timeout
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Monetary budget used for accumulated-cost alerting
    #[serde(default = "default_budget_limit")]
    pub budget_limit: f64,

    /// Fraction of `budget_limit` at which a cost alert fires
    #[serde(default = "default_cost_alert_threshold")]
    pub cost_alert_threshold: f64,

    /// Base delay for the exponential retry backoff
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// How often a statistics snapshot is emitted
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// How often provider health is probed
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// How often expired results are evicted
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// How long completed results are retained
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Ring capacity of the completed-request history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Capacity of the default token budget created at startup
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: u64,

    /// Period of the default token budget ("daily", "weekly", "monthly", ...)
    #[serde(default = "default_budget_period")]
    pub default_budget_period: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            default_timeout_secs: default_timeout_secs(),
            budget_limit: default_budget_limit(),
            cost_alert_threshold: default_cost_alert_threshold(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            result_ttl_secs: default_result_ttl_secs(),
            history_capacity: default_history_capacity(),
            default_budget_tokens: default_budget_tokens(),
            default_budget_period: default_budget_period(),
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ServiceError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|err| {
            ServiceError::Config(format!("failed to parse {}: {err}", path.display()))
        })
    }

    /// Load from an optional file, apply environment overrides, and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override individual settings from `TOKENWISE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        override_from_env("TOKENWISE_MAX_WORKERS", &mut self.max_workers);
        override_from_env("TOKENWISE_DEFAULT_TIMEOUT_SECS", &mut self.default_timeout_secs);
        override_from_env("TOKENWISE_BUDGET_LIMIT", &mut self.budget_limit);
        override_from_env("TOKENWISE_COST_ALERT_THRESHOLD", &mut self.cost_alert_threshold);
        override_from_env("TOKENWISE_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms);
        override_from_env("TOKENWISE_DEFAULT_BUDGET_TOKENS", &mut self.default_budget_tokens);
        if let Ok(value) = std::env::var("TOKENWISE_DEFAULT_BUDGET_PERIOD") {
            self.default_budget_period = value;
        }
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ServiceError::Config("max_workers must be at least 1".into()));
        }
        if self.budget_limit <= 0.0 {
            return Err(ServiceError::Config("budget_limit must be positive".into()));
        }
        if self.cost_alert_threshold <= 0.0 || self.cost_alert_threshold > 1.0 {
            return Err(ServiceError::Config(
                "cost_alert_threshold must be within (0, 1]".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ServiceError::Config(
                "history_capacity must be at least 1".into(),
            ));
        }
        if self.default_budget_tokens == 0 {
            return Err(ServiceError::Config(
                "default_budget_tokens must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Set the maximum number of concurrent workers
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the fallback request timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the monetary budget limit
    pub fn with_budget_limit(mut self, budget_limit: f64) -> Self {
        self.budget_limit = budget_limit;
        self
    }

    /// Set the base retry backoff delay
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the completed-request history capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

fn override_from_env<T>(key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(key) {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(err) => {
                warn!(key, value = %value, error = %err, "ignoring unparsable environment override");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.budget_limit, 1000.0);
        assert_eq!(config.cost_alert_threshold, 0.8);
        assert_eq!(config.retry_base_delay(), Duration::from_millis(1000));
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.default_budget_period, "monthly");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: ServiceConfig =
            serde_yaml::from_str("max_workers: 2\nbudget_limit: 50.0\n").unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.budget_limit, 50.0);
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.result_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn from_file_reads_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers: 4").unwrap();
        writeln!(file, "retry_base_delay_ms: 250").unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.retry_base_delay(), Duration::from_millis(250));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = ServiceConfig::from_file("/nonexistent/tokenwise.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("TOKENWISE_MAX_WORKERS", "3");
        std::env::set_var("TOKENWISE_BUDGET_LIMIT", "12.5");
        std::env::set_var("TOKENWISE_DEFAULT_BUDGET_PERIOD", "weekly");

        let mut config = ServiceConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("TOKENWISE_MAX_WORKERS");
        std::env::remove_var("TOKENWISE_BUDGET_LIMIT");
        std::env::remove_var("TOKENWISE_DEFAULT_BUDGET_PERIOD");

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.budget_limit, 12.5);
        assert_eq!(config.default_budget_period, "weekly");
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        std::env::set_var("TOKENWISE_RETRY_BASE_DELAY_MS", "not-a-number");
        let mut config = ServiceConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("TOKENWISE_RETRY_BASE_DELAY_MS");
        assert_eq!(config.retry_base_delay_ms, 1000);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let err = ServiceConfig::default().with_max_workers(0).validate();
        assert!(err.unwrap_err().to_string().contains("max_workers"));

        let err = ServiceConfig::default().with_budget_limit(0.0).validate();
        assert!(err.unwrap_err().to_string().contains("budget_limit"));

        let mut config = ServiceConfig::default();
        config.cost_alert_threshold = 1.5;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cost_alert_threshold"));
    }
}
