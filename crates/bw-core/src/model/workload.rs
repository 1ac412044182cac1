//! Pods and persistent volume claims: the resources an instance owns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ResourceLimits;
use crate::types::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub volume: Option<VolumeMount>,
    pub node_selector: BTreeMap<String, String>,
    pub priority_class: Option<String>,
}

/// A claim mounted into the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub claim_name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    pub phase: PodPhase,
    pub ready: bool,
    /// Machine-readable cause, e.g. `Unschedulable`
    pub reason: Option<String>,
    pub message: Option<String>,
    pub node: Option<String>,
    pub started_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Pod reason reported when no node can take the pod
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_running_and_ready(&self) -> bool {
        self.status.phase == PodPhase::Running && self.status.ready
    }

    /// The pod's process has ended and it will not run again
    pub fn has_exited(&self) -> bool {
        matches!(self.status.phase, PodPhase::Succeeded | PodPhase::Failed)
    }

    pub fn is_unschedulable(&self) -> bool {
        self.status.phase == PodPhase::Pending
            && self.status.reason.as_deref() == Some(REASON_UNSCHEDULABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
    #[serde(default)]
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimSpec {
    pub size: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimStatus {
    pub phase: ClaimPhase,
    /// Backend-specific location of the bound volume
    pub volume_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

impl PersistentVolumeClaim {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_bound(&self) -> bool {
        self.status.phase == ClaimPhase::Bound
    }
}
