//! Reconciliation controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the reconciliation controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of reconcile workers
    pub workers: usize,

    /// Interval at which every instance is re-enqueued
    #[serde(with = "duration_secs")]
    pub resync_interval: Duration,

    /// Interval between idle sweeps
    #[serde(with = "duration_secs")]
    pub gc_interval: Duration,

    /// Idle timeout for instances whose template sets none
    #[serde(with = "duration_secs")]
    pub default_idle_timeout: Duration,

    /// Failed provisioning attempts before an instance is marked Failed
    pub retry_budget: u32,

    /// Largest CPU request a session may make, in millicores
    pub max_cpu_millis: u64,

    /// Largest memory request a session may make, in bytes
    pub max_memory_bytes: u64,

    /// Backoff between provisioning retries
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(300),
            gc_interval: Duration::from_secs(60),
            default_idle_timeout: Duration::from_secs(3600),
            retry_budget: 8,
            max_cpu_millis: 16_000,
            max_memory_bytes: 64 * 1024 * 1024 * 1024,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "super::serde_utils::duration_millis")]
    pub initial_ms: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
