//! Versioned resource store abstraction

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::Object;
use crate::types::{Kind, LabelSelector};

/// Type of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// One change to one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: EventType,
    /// Object state after the change; for deletions, the last state
    pub object: Object,
    /// Store version at which the change happened
    pub resource_version: u64,
}

/// Consistent snapshot of one kind
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<Object>,
    /// Watch from this version to see every later change
    pub resource_version: u64,
}

/// Conditions a delete must satisfy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    /// Fail with `Conflict` unless the object is still at this version
    pub resource_version: Option<u64>,
}

/// What a delete call did
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The object is gone
    Deleted,
    /// Finalizers are pending; the object now carries a deletion timestamp
    Pending(Object),
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// A store of versioned objects with optimistic concurrency.
///
/// Every successful write advances a store-global resource version.
/// `update` and `update_status` fail with `Conflict` unless the presented
/// object carries the stored version.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list(
        &self,
        kind: Kind,
        selector: Option<&LabelSelector>,
    ) -> Result<ObjectList, StoreError>;

    async fn get(&self, kind: Kind, name: &str) -> Result<Object, StoreError>;

    /// Stream every change of `kind` after version `since`, in order.
    /// Fails with `Expired` when `since` is older than the retained history.
    async fn watch(&self, kind: Kind, since: u64) -> Result<WatchStream, StoreError>;

    async fn create(&self, object: Object) -> Result<Object, StoreError>;

    /// Replace metadata and spec; the stored status is kept
    async fn update(&self, object: Object) -> Result<Object, StoreError>;

    /// Replace status only
    async fn update_status(&self, object: Object) -> Result<Object, StoreError>;

    async fn delete(
        &self,
        kind: Kind,
        name: &str,
        preconditions: Preconditions,
    ) -> Result<DeleteOutcome, StoreError>;
}
