//! Session templates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SessionKind;
use crate::types::ObjectMeta;

/// Reusable session blueprint, managed by administrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub metadata: ObjectMeta,
    pub spec: TemplateSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSpec {
    /// Shown in listings
    pub description: String,
    /// Container image the session pod runs
    pub image: String,
    /// Entry command; empty means the image default shell
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub default_kind: SessionKind,
    pub volume: VolumeSpec,
    /// Idle period after which ephemeral sessions are collected
    pub idle_timeout_secs: Option<u64>,
    pub node_selector: BTreeMap<String, String>,
    /// `None` for system templates visible to everyone, otherwise the
    /// only user allowed to see and instantiate it
    pub owner: Option<String>,
}

/// CPU and memory limits in Kubernetes quantity notation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Volume requested for a session's home directory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSpec {
    #[default]
    None,
    Claim {
        size: String,
        storage_class: Option<String>,
        mount_path: String,
    },
}

impl VolumeSpec {
    pub fn is_none(&self) -> bool {
        matches!(self, VolumeSpec::None)
    }
}

impl Template {
    pub fn new(name: impl Into<String>, spec: TemplateSpec) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether `user` may see and instantiate this template
    pub fn visible_to(&self, user: &str) -> bool {
        match &self.spec.owner {
            None => true,
            Some(owner) => owner == user,
        }
    }
}
