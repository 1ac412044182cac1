//! SSH gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the SSH gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the SSH server to
    pub bind_address: String,

    /// Path to the host key file (generated on first start)
    pub host_key_path: PathBuf,

    /// TOML file listing users and their public keys
    pub users_file: PathBuf,

    /// Accept any public key for any user (development only)
    pub allow_unknown_users: bool,

    /// IPC port for CLI communication (localhost only)
    pub ipc_port: u16,

    /// How long a connect waits for its instance to become Ready
    #[serde(with = "duration_secs")]
    pub provisioning_timeout: Duration,

    /// Outbound window assumed before the client's first adjustment
    pub initial_window: u32,

    /// Largest chunk read from a pod in one go
    pub chunk_size: usize,

    /// How long the surviving direction keeps flushing after one side closes
    #[serde(with = "duration_millis")]
    pub linger_ms: Duration,

    /// Minimum spacing between activity touches of a live session
    #[serde(with = "duration_secs")]
    pub touch_interval: Duration,

    /// Seconds to delay a rejected authentication
    #[serde(with = "duration_secs")]
    pub auth_rejection_time: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            host_key_path: config_dir.join("host_key"),
            users_file: config_dir.join("users.toml"),
            allow_unknown_users: false,
            ipc_port: 22240,
            provisioning_timeout: Duration::from_secs(120),
            initial_window: 2 * 1024 * 1024,
            chunk_size: 32 * 1024,
            linger_ms: Duration::from_millis(500),
            touch_interval: Duration::from_secs(60),
            auth_rejection_time: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }
}
