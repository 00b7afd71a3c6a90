//! Runtime configuration.
//!
//! Durations are written human-readable ("30s", "500ms") in config files.
//! Trip thresholds, cooldowns and latency ceilings are properties of the
//! circuits themselves (see `switchboard_core::types::defaults`); this
//! config covers only what the runtime adds around the board.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use switchboard_core::types::defaults;

/// Errors from loading runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Configuration for the breaker registry runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on a single probe attempt.
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,

    /// Extra probe attempts after the first failure.
    pub probe_retries: usize,

    /// How long a probe reading may be served from cache.
    #[serde(with = "duration_str")]
    pub probe_cache_ttl: Duration,

    /// Probe readings kept in cache.
    pub probe_cache_capacity: u64,

    /// Audit entries retained in memory.
    pub audit_capacity: usize,

    /// Alerts retained in memory.
    pub alert_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            probe_retries: 2,
            probe_cache_ttl: Duration::from_secs(1),
            probe_cache_capacity: 1024,
            audit_capacity: defaults::AUDIT_CAPACITY,
            alert_capacity: defaults::ALERT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.probe_retries, 2);
        assert_eq!(config.audit_capacity, 10_000);
        assert_eq!(config.alert_capacity, 1_000);
    }

    #[test]
    fn test_parse_human_durations() {
        let config = RuntimeConfig::from_yaml("probe_timeout: 500ms\nprobe_cache_ttl: 2s\n").unwrap();
        assert_eq!(config.probe_timeout, Duration::from_millis(500));
        assert_eq!(config.probe_cache_ttl, Duration::from_secs(2));
        // Unspecified fields keep their defaults.
        assert_eq!(config.probe_retries, 2);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = RuntimeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = RuntimeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.probe_timeout, config.probe_timeout);
        assert_eq!(parsed.probe_cache_capacity, config.probe_cache_capacity);
    }
}
