use durable_core::workflow::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between heartbeats of an untransacted step.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default journal byte budget per workflow.
pub const DEFAULT_MAX_JOURNAL_SIZE: usize = 1 << 20;

/// Engine tuning knobs.
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub max_journal_size: usize,
    /// Level for workflows started without an explicit one.
    pub default_log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_journal_size: DEFAULT_MAX_JOURNAL_SIZE,
            default_log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_journal_size(mut self, bytes: usize) -> Self {
        self.max_journal_size = bytes;
        self
    }

    #[must_use]
    pub fn with_default_log_level(mut self, level: LogLevel) -> Self {
        self.default_log_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.max_journal_size, 1_048_576);
        assert_eq!(config.default_log_level, LogLevel::Info);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"max_journal_size": 4096, "default_log_level": "DEBUG"}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_journal_size, 4096);
        assert_eq!(config.default_log_level, LogLevel::Debug);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }
}
