//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use bw_core::config::{self, BurrowConfig};
use bw_core::error::ConfigError;

use crate::output::{print_error, print_info, print_success};

/// The file `--config` names, or the default location
pub fn resolve_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Configuration as the commands see it. An explicit `--config` must
/// exist; a missing default file means built-in defaults.
pub fn load_effective_config(config_path: Option<&PathBuf>) -> Result<BurrowConfig> {
    let path = resolve_config_path(config_path);
    match config::load_config::<BurrowConfig>(&path) {
        Ok(config) => {
            tracing::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(ConfigError::NotFound(_)) if config_path.is_none() => {
            tracing::debug!("No configuration at {}; using defaults", path.display());
            Ok(BurrowConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {}", path.display())),
    }
}

/// Print the effective configuration as TOML
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_config_path(config_path);
    let config = load_effective_config(config_path)?;

    if path.exists() {
        print_info(&format!("Configuration file: {}", path.display()));
    } else {
        print_info(&format!(
            "No configuration file at {}; showing defaults",
            path.display()
        ));
    }
    println!();
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_config_path(config_path).display());
}

/// Write a configuration file with every default spelled out
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {}", path.display()));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &BurrowConfig::default())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    print_success(&format!("Created configuration file: {}", path.display()));

    let users_file = path
        .parent()
        .map(|dir| dir.join("users.toml"))
        .unwrap_or_else(|| PathBuf::from("users.toml"));
    if !users_file.exists() {
        print_info("Authorize users by listing their public keys in the users file:");
        print_info(&format!("  {}", users_file.display()));
        print_info("  [[users]]");
        print_info("  name = \"alice\"");
        print_info("  public_keys = [\"ssh-ed25519 AAAA... alice@laptop\"]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(load_effective_config(Some(&path)).is_err());
    }

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let config = load_effective_config(Some(&path)).unwrap();
        assert_eq!(config.gateway.ipc_port, BurrowConfig::default().gateway.ipc_port);
    }

    #[test]
    fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[controller]\nworkers = 3\n").unwrap();

        config_init(Some(&path), false).unwrap();
        let config = load_effective_config(Some(&path)).unwrap();
        assert_eq!(config.controller.workers, 3);

        config_init(Some(&path), true).unwrap();
        let config = load_effective_config(Some(&path)).unwrap();
        assert_eq!(config.controller.workers, BurrowConfig::default().controller.workers);
    }
}
