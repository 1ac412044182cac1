//! bw-core: Core model and abstractions for burrow
//!
//! This crate provides the resource model (templates, instances, pods and
//! claims), the pure login resolver, configuration structures, and the two
//! traits every backend implements: [`traits::ResourceStore`] for the
//! versioned object store and [`traits::PodExecutor`] for pod exec streams.

pub mod config;
pub mod error;
pub mod ipc;
pub mod model;
pub mod naming;
pub mod resolver;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{BwError, ExecError, ResolveError, StoreError};
pub use model::{
    ClaimPhase, FailureCategory, FailureReason, Instance, InstanceOverrides, InstanceSpec,
    InstanceStatus, KindPolicy, Object, PersistentVolumeClaim, Phase, Pod, PodPhase, Resource,
    ResourceLimits, SessionKind, Template, TemplateSpec, VolumeSpec,
};
pub use resolver::{resolve, Catalog, Intent, ResolvedLogin};
pub use types::{Kind, LabelSelector, ObjectMeta, OwnerReference, TerminalSize};

/// Label carrying the owning instance name on pods and claims.
pub const INSTANCE_LABEL: &str = "burrow.dev/instance";

/// Label carrying the session owner on instances, pods and claims.
pub const OWNER_LABEL: &str = "burrow.dev/owner";

/// Label carrying the source template, when there is one.
pub const TEMPLATE_LABEL: &str = "burrow.dev/template";

/// Label marking objects managed by burrow.
pub const APP_LABEL: &str = "app.kubernetes.io/managed-by";

/// Finalizer the controller holds on every instance until teardown completes.
pub const TEARDOWN_FINALIZER: &str = "burrow.dev/teardown";
