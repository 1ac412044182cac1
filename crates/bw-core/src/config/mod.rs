//! Configuration management for burrow

mod controller;
mod gateway;
mod node;
pub mod serde_utils;

pub use controller::{BackoffConfig, ControllerConfig};
pub use gateway::GatewayConfig;
pub use node::{NodeConfig, StoreConfig};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurrowConfig {
    pub gateway: GatewayConfig,
    pub controller: ControllerConfig,
    pub node: NodeConfig,
    pub store: StoreConfig,
}

impl BurrowConfig {
    /// Reject values no component can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.workers == 0 {
            return Err(ConfigError::Invalid(
                "controller.workers must be at least 1".to_string(),
            ));
        }
        if self.gateway.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "gateway.chunk_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.controller.backoff.jitter) {
            return Err(ConfigError::Invalid(
                "controller.backoff.jitter must be between 0 and 1".to_string(),
            ));
        }
        if self.controller.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "controller.backoff.multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("burrow")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: BurrowConfig = toml::from_str(
            r#"
            [gateway]
            bind_address = "127.0.0.1:2022"
            linger_ms = 100

            [controller]
            workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.bind_address, "127.0.0.1:2022");
        assert_eq!(config.gateway.linger_ms, Duration::from_millis(100));
        assert_eq!(config.gateway.ipc_port, 22240);
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.retry_budget, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BurrowConfig::default();
        config.controller.workers = 7;
        config.gateway.allow_unknown_users = true;
        save_config(&path, &config).unwrap();

        let loaded: BurrowConfig = load_config(&path).unwrap();
        assert_eq!(loaded.controller.workers, 7);
        assert!(loaded.gateway.allow_unknown_users);
        assert_eq!(loaded.controller.backoff.multiplier, 2.0);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config::<BurrowConfig>(Path::new("/nonexistent/burrow.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = BurrowConfig::default();
        config.controller.workers = 0;
        assert!(config.validate().is_err());
    }
}
