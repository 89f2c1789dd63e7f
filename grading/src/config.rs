//! Engine configuration
//!
//! Defaults are overridden by a TOML file (`--config`) and then by
//! `GRADING_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a grader's earlier record when they score the same paper again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Every submission appends a new record
    #[default]
    AppendAlways,
    /// A later score from the same grader and role overwrites the earlier record
    CorrectInPlace,
}

impl std::str::FromStr for RecordPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append_always" | "append" => Ok(RecordPolicy::AppendAlways),
            "correct_in_place" | "correct" => Ok(RecordPolicy::CorrectInPlace),
            other => Err(ConfigError::Invalid(format!(
                "unknown record policy: {}",
                other
            ))),
        }
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the grading engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Papers handed out per request
    pub batch_size: usize,

    /// Seconds before an unanswered first/second-round assignment is reclaimed
    pub reclaim_after_secs: u64,

    /// Seconds between reclaimer sweeps
    pub sweep_interval_secs: u64,

    /// Production records per self-check window
    pub self_check_window: usize,

    pub record_policy: RecordPolicy,

    /// Broadcast buffer per event subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            reclaim_after_secs: 1800,
            sweep_interval_secs: 60,
            self_check_window: 100,
            record_policy: RecordPolicy::AppendAlways,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables over defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `GRADING_*` environment variables
    ///
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("GRADING_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.batch_size = n;
            }
        }
        if let Ok(val) = std::env::var("GRADING_RECLAIM_AFTER_SECS") {
            if let Ok(n) = val.parse() {
                self.reclaim_after_secs = n;
            }
        }
        if let Ok(val) = std::env::var("GRADING_SWEEP_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                self.sweep_interval_secs = n;
            }
        }
        if let Ok(val) = std::env::var("GRADING_SELF_CHECK_WINDOW") {
            if let Ok(n) = val.parse() {
                self.self_check_window = n;
            }
        }
        if let Ok(val) = std::env::var("GRADING_RECORD_POLICY") {
            if let Ok(policy) = val.parse() {
                self.record_policy = policy;
            }
        }
        if let Ok(val) = std::env::var("GRADING_EVENT_CAPACITY") {
            if let Ok(n) = val.parse() {
                self.event_capacity = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("batch_size", self.batch_size == 0),
            ("reclaim_after_secs", self.reclaim_after_secs == 0),
            ("sweep_interval_secs", self.sweep_interval_secs == 0),
            ("self_check_window", self.self_check_window == 0),
            ("event_capacity", self.event_capacity == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("{} must be positive", name))),
            None => Ok(()),
        }
    }

    pub fn reclaim_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reclaim_after_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.reclaim_after(), chrono::Duration::minutes(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            batch_size = 4
            record_policy = "correct_in_place"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 4);
        assert_eq!(config.record_policy, RecordPolicy::CorrectInPlace);
        assert_eq!(config.self_check_window, 100);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let result = EngineConfig::from_toml_str("batch_size = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_record_policy_parse() {
        assert_eq!(
            "correct".parse::<RecordPolicy>().unwrap(),
            RecordPolicy::CorrectInPlace
        );
        assert!("sometimes".parse::<RecordPolicy>().is_err());
    }
}
