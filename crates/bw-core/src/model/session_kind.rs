//! Session kinds and their lifecycle policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How long a session lives and what happens to its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Auto-created on connect, collected when idle
    #[default]
    Ephemeral,
    /// Survives disconnect and idle; deleted only on request
    Persistent,
    /// Like ephemeral, but scheduled at low priority and evicted first
    Preemptible,
}

/// Lifecycle behavior attached to a [`SessionKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    /// Router may create an instance of this kind on first connect
    pub auto_create_on_connect: bool,
    /// Idle sweep may delete instances of this kind
    pub idle_gc_eligible: bool,
    /// Volume outlives the instance
    pub volume_retained_on_delete: bool,
    /// Pods run in the low-priority class
    pub evictable: bool,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [
        SessionKind::Ephemeral,
        SessionKind::Persistent,
        SessionKind::Preemptible,
    ];

    pub fn policy(&self) -> KindPolicy {
        match self {
            SessionKind::Ephemeral => KindPolicy {
                auto_create_on_connect: true,
                idle_gc_eligible: true,
                volume_retained_on_delete: false,
                evictable: false,
            },
            SessionKind::Persistent => KindPolicy {
                auto_create_on_connect: false,
                idle_gc_eligible: false,
                volume_retained_on_delete: true,
                evictable: false,
            },
            SessionKind::Preemptible => KindPolicy {
                auto_create_on_connect: true,
                idle_gc_eligible: true,
                volume_retained_on_delete: false,
                evictable: true,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Ephemeral => "ephemeral",
            SessionKind::Persistent => "persistent",
            SessionKind::Preemptible => "preemptible",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(SessionKind::Ephemeral),
            "persistent" => Ok(SessionKind::Persistent),
            "preemptible" => Ok(SessionKind::Preemptible),
            other => Err(format!(
                "unknown session kind '{}' (expected ephemeral, persistent or preemptible)",
                other
            )),
        }
    }
}
