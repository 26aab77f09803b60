//! Engine configuration, loadable from YAML

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rate of the fixed-update phase, in steps per second.
    #[serde(default = "default_fixed_update_fps")]
    pub fixed_update_fps: f64,
    #[serde(default)]
    pub run: RunConfig,
}

/// Defaults for [`crate::Engine::run_configured`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 0 runs until stopped.
    #[serde(default)]
    pub max_steps: u64,
}

fn default_fixed_update_fps() -> f64 {
    60.0
}

fn default_interval_ms() -> u64 {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_update_fps: default_fixed_update_fps(),
            run: RunConfig::default(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_steps: 0,
        }
    }
}

impl RunConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fixed_update_fps.is_finite() || self.fixed_update_fps <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "fixed_update_fps must be a positive number, got {}",
                self.fixed_update_fps
            )));
        }
        if self.fixed_interval().is_zero() {
            return Err(ConfigError::Validation(format!(
                "fixed_update_fps {} is too high to schedule",
                self.fixed_update_fps
            )));
        }
        Ok(())
    }

    /// Length of one fixed-update step.
    pub fn fixed_interval(&self) -> Duration {
        if !self.fixed_update_fps.is_finite() || self.fixed_update_fps <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.fixed_update_fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.fixed_update_fps, 60.0);
        assert_eq!(config.run.interval_ms, 16);
        assert_eq!(config.run.max_steps, 0);
        assert!(config.validate().is_ok());
        assert_eq!(config.fixed_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml_str("fixed_update_fps: 30\n").unwrap();
        assert_eq!(config.fixed_update_fps, 30.0);
        assert_eq!(config.run, RunConfig::default());

        let yaml = "run:\n  interval_ms: 5\n  max_steps: 12\n";
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.fixed_update_fps, 60.0);
        assert_eq!(config.run.interval(), Duration::from_millis(5));
        assert_eq!(config.run.max_steps, 12);
    }

    #[test]
    fn test_rejects_bad_rate() {
        for text in ["fixed_update_fps: 0", "fixed_update_fps: -5", "fixed_update_fps: .nan"] {
            let err = EngineConfig::from_yaml_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{text}");
        }
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = EngineConfig::from_yaml_str("fixed_update_fps: [fast]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        let config = EngineConfig {
            fixed_update_fps: 120.0,
            run: RunConfig {
                interval_ms: 1,
                max_steps: 5,
            },
        };

        config.to_yaml_path(&path).unwrap();
        assert_eq!(EngineConfig::from_yaml_path(&path).unwrap(), config);
    }
}
