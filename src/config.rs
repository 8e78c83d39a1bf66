//! Configuration for the engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineSettings;

/// Main configuration.
///
/// Loaded from a JSON file in the platform config directory; a missing file
/// means default behavior, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Rolling feature window length W.
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Interval between aggregation cycles.
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Active-user lookback as a multiple of the window length.
    pub lookback_factor: u32,

    /// Budget for one user's fetch-compute-persist sequence.
    #[serde(with = "duration_serde")]
    pub user_timeout: Duration,

    /// Retained switch-rate samples per user for percentile conditions.
    pub percentile_history: usize,

    /// Path of the rule catalog file.
    pub rules_path: PathBuf,

    /// Port for the telemetry/delivery server.
    pub bind_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("attune-engine");

        Self {
            window: Duration::from_secs(20),
            tick_interval: Duration::from_secs(5),
            lookback_factor: 2,
            user_timeout: Duration::from_secs(3),
            percentile_history: crate::core::DEFAULT_HISTORY_CAP,
            rules_path: config_dir.join("rules.json"),
            bind_port: 3000,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("attune-engine")
            .join("config.json")
    }

    /// The pipeline tunables carried by this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            window: self.window,
            lookback_factor: self.lookback_factor,
            user_timeout: self.user_timeout,
            percentile_history: self.percentile_history,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window, Duration::from_secs(20));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.lookback_factor, 2);
        assert_eq!(config.bind_port, 3000);
    }

    #[test]
    fn test_round_trip_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.window, config.window);
        assert_eq!(parsed.rules_path, config.rules_path);
    }

    #[test]
    fn test_pipeline_settings_mirror_config() {
        let config = Config {
            window: Duration::from_secs(30),
            lookback_factor: 3,
            ..Config::default()
        };

        let settings = config.pipeline_settings();
        assert_eq!(settings.window, Duration::from_secs(30));
        assert_eq!(settings.lookback_factor, 3);
    }
}
