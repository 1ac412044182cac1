//! Core error types for burrow

use crate::types::Kind;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the burrow ecosystem
#[derive(Error, Debug)]
pub enum BwError {
    /// Resource store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Login resolution error
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Pod exec error
    #[error("Exec error: {0}")]
    Exec(#[from] ExecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a resource store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The presented resource version is stale
    #[error("conflict writing {kind} {name}: object was modified")]
    Conflict { kind: Kind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: Kind, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: Kind, name: String },

    /// Watch start point is older than the retained history
    #[error("resource version {0} is too old")]
    Expired(u64),

    /// The write was rejected by validation
    #[error("invalid {kind} {name}: {reason}")]
    Invalid {
        kind: Kind,
        name: String,
        reason: String,
    },

    /// Quota or capacity pressure; retry later
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The store could not be reached; retry later
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::QuotaExceeded(_) | StoreError::Unavailable(_) | StoreError::Conflict { .. }
        )
    }

    /// Whether the failure reflects capacity pressure
    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Login resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed login '{0}': expected owner or owner-selector")]
    MalformedLogin(String),

    /// Selector names both a template and one of the owner's instances
    #[error("'{selector}' matches both a template and one of your instances")]
    AmbiguousSelector { selector: String },

    #[error("no template or instance named '{selector}'")]
    UnknownSelector { selector: String },

    #[error("instance '{selector}' belongs to another user")]
    NotOwner { selector: String },
}

/// Pod exec errors
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("pod not found: {0}")]
    PodNotFound(String),

    #[error("pod {0} is not running")]
    PodNotRunning(String),

    /// PTY or process spawn failure
    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::QuotaExceeded("pods".into()).is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::Internal("bug".into()).is_transient());
        assert!(!StoreError::Invalid {
            kind: Kind::Pod,
            name: "p".into(),
            reason: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_resolve_error_messages_are_user_facing() {
        let err = ResolveError::NotOwner {
            selector: "42".into(),
        };
        assert_eq!(err.to_string(), "instance '42' belongs to another user");
    }
}
