//! Session instances

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Phase, ResourceLimits, SessionKind, VolumeSpec};
use crate::types::ObjectMeta;

/// One session: a pod plus, depending on kind, a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub metadata: ObjectMeta,
    pub spec: InstanceSpec,
    #[serde(default)]
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSpec {
    /// Set at creation, never changes
    pub owner: String,
    /// Source template; `None` for standalone instances
    pub template: Option<String>,
    pub kind: SessionKind,
    pub overrides: InstanceOverrides,
}

/// Per-instance values that win over the template's
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOverrides {
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub resources: Option<ResourceLimits>,
    pub volume: Option<VolumeSpec>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceStatus {
    pub phase: Phase,
    pub pod_ref: Option<String>,
    pub volume_ref: Option<String>,
    /// Unix millis of the last observed session activity
    pub last_active: Option<u64>,
    pub failure: Option<FailureReason>,
    /// Human-readable progress note
    pub message: Option<String>,
    /// Unix millis of the last phase change
    pub last_transition: u64,
}

/// Why an instance ended up Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Quota or scheduling pressure outlasted the retry budget
    Capacity,
    InvalidSpec,
    Other,
}

impl FailureReason {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

impl Instance {
    pub fn new(name: impl Into<String>, spec: InstanceSpec) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec,
            status: InstanceStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn owner(&self) -> &str {
        &self.spec.owner
    }

    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    /// Last activity, falling back to creation time
    pub fn last_active_or_created(&self) -> u64 {
        self.status
            .last_active
            .unwrap_or(self.metadata.creation_timestamp)
    }

    /// Check the immutable fields between a stored instance and an update
    pub fn validate_update(&self, next: &Instance) -> Result<(), String> {
        if self.spec.owner != next.spec.owner {
            return Err("owner is immutable".to_string());
        }
        if self.spec.kind != next.spec.kind {
            return Err("kind is immutable".to_string());
        }
        if self.spec.template != next.spec.template {
            return Err("template is immutable".to_string());
        }
        Ok(())
    }

    /// Check a new instance before it is stored
    pub fn validate(&self) -> Result<(), String> {
        if self.spec.owner.is_empty() {
            return Err("owner must be set".to_string());
        }
        if self.spec.owner.contains('-') {
            return Err("owner must not contain '-'".to_string());
        }
        if self.spec.template.is_none() && self.spec.overrides.image.is_none() {
            return Err("standalone instances need an image".to_string());
        }
        Ok(())
    }
}
