//! Local node runtime and store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the local node runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name reported in pod status
    pub name: String,

    /// Root directory for volume data
    pub data_dir: PathBuf,

    /// Shell started for pods that carry no command
    pub shell: String,

    /// Maximum number of pods running at once
    pub max_pods: usize,

    /// Simulated container start latency
    #[serde(with = "duration_millis")]
    pub startup_delay_ms: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: gethostname::gethostname().to_string_lossy().to_string(),
            data_dir: super::default_config_dir().join("volumes"),
            shell: default_shell(),
            max_pods: 32,
            startup_delay_ms: Duration::from_millis(0),
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Configuration for the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file; no persistence when unset
    pub snapshot_path: Option<PathBuf>,

    /// Interval between snapshots
    #[serde(with = "duration_secs")]
    pub snapshot_interval: Duration,

    /// Number of watch events retained for resuming watchers
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some(super::default_config_dir().join("store.snapshot")),
            snapshot_interval: Duration::from_secs(30),
            history_limit: 1024,
        }
    }
}
