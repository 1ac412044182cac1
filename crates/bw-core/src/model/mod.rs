//! Resource model: templates, instances and the workloads they own

mod instance;
mod object;
mod phase;
pub mod quantity;
mod session_kind;
mod template;
mod workload;

pub use instance::{
    FailureCategory, FailureReason, Instance, InstanceOverrides, InstanceSpec, InstanceStatus,
};
pub use object::{Object, Resource};
pub use phase::Phase;
pub use session_kind::{KindPolicy, SessionKind};
pub use template::{ResourceLimits, Template, TemplateSpec, VolumeSpec};
pub use workload::{
    ClaimPhase, ClaimSpec, ClaimStatus, PersistentVolumeClaim, Pod, PodPhase, PodSpec, PodStatus,
    VolumeMount, REASON_UNSCHEDULABLE,
};
