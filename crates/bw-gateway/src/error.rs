//! Gateway error types
//!
//! [`RouteError`] is what a connecting user sees: every variant renders as a
//! single human-readable line written to the SSH channel before it closes.

use std::time::Duration;

use thiserror::Error;

use bw_core::{ResolveError, SessionKind, StoreError};

/// Why a login could not be turned into a Ready instance
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// The instance exists but cannot take sessions
    #[error("instance '{name}' is unavailable: {reason}")]
    InstanceUnavailable { name: String, reason: String },

    #[error("instance '{name}' was not ready within {}s", waited.as_secs())]
    ProvisioningTimeout { name: String, waited: Duration },

    /// Provisioning gave up under quota or scheduling pressure
    #[error("no capacity for instance '{name}': {reason}")]
    CapacityExhausted { name: String, reason: String },

    /// The template's kind is never created implicitly on connect
    #[error(
        "template '{template}' creates {kind} sessions, which must be provisioned by an administrator"
    )]
    RequiresProvisioning { template: String, kind: SessionKind },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The connection went away while waiting
    #[error("connection closed")]
    Cancelled,
}

/// Errors ending a bridged session
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("pod stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The SSH channel refused further writes
    #[error("client channel closed")]
    ChannelClosed,
}
