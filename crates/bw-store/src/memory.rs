//! In-memory versioned object store
//!
//! Every write advances one store-global resource version and is recorded
//! in a bounded history, so watchers can resume from any version that is
//! still retained. Deleting an object with finalizers only marks it;
//! removing an object cascades to every object that names it as owner.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

use bw_core::time::current_time_millis;
use bw_core::traits::{
    DeleteOutcome, EventType, ObjectList, Preconditions, ResourceStore, WatchEvent, WatchStream,
};
use bw_core::{Kind, LabelSelector, Object, StoreError};

use crate::snapshot::SnapshotData;

/// Default number of events kept for resuming watchers
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Store operation a fault can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

struct Fault {
    op: FaultOp,
    kind: Kind,
    error: StoreError,
    remaining: usize,
}

/// Count of mutating calls issued against the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub creates: u64,
    pub updates: u64,
    pub status_updates: u64,
    pub deletes: u64,
}

impl StoreStats {
    pub fn mutations(&self) -> u64 {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    status_updates: AtomicU64,
    deletes: AtomicU64,
}

struct State {
    resource_version: u64,
    objects: BTreeMap<Kind, BTreeMap<String, Object>>,
    history: VecDeque<WatchEvent>,
    /// Highest version no longer present in `history`
    compacted: u64,
    history_limit: usize,
    events: broadcast::Sender<WatchEvent>,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }

    fn get(&self, kind: Kind, name: &str) -> Option<&Object> {
        self.objects.get(&kind).and_then(|m| m.get(name))
    }

    fn insert(&mut self, object: Object) {
        self.objects
            .entry(object.kind())
            .or_default()
            .insert(object.name().to_string(), object);
    }

    fn record(&mut self, event_type: EventType, object: Object) {
        let event = WatchEvent {
            event_type,
            resource_version: object.meta().resource_version,
            object,
        };
        trace!(
            "{:?} {} {} at {}",
            event.event_type,
            event.object.kind(),
            event.object.name(),
            event.resource_version
        );
        // No receivers is fine; history still serves late watchers
        let _ = self.events.send(event.clone());
        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.resource_version;
            }
        }
    }

    /// Delete honoring finalizers
    fn delete_object(&mut self, kind: Kind, name: &str) -> Option<DeleteOutcome> {
        let object = self.get(kind, name)?;

        if object.meta().finalizers.is_empty() {
            self.remove_object(kind, name);
            return Some(DeleteOutcome::Deleted);
        }
        if object.meta().is_deleting() {
            return Some(DeleteOutcome::Pending(object.clone()));
        }

        let mut marked = object.clone();
        let rv = self.next_version();
        let meta = marked.meta_mut();
        meta.deletion_timestamp = Some(current_time_millis());
        meta.resource_version = rv;
        self.insert(marked.clone());
        self.record(EventType::Modified, marked.clone());
        Some(DeleteOutcome::Pending(marked))
    }

    /// Remove unconditionally, then delete every dependent
    fn remove_object(&mut self, kind: Kind, name: &str) {
        let Some(mut object) = self.objects.get_mut(&kind).and_then(|m| m.remove(name)) else {
            return;
        };
        let rv = self.next_version();
        object.meta_mut().resource_version = rv;
        let uid = object.meta().uid.clone();
        self.record(EventType::Deleted, object);

        let dependents: Vec<(Kind, String)> = self
            .objects
            .iter()
            .flat_map(|(k, objects)| {
                objects
                    .values()
                    .filter(|o| o.meta().is_owned_by(&uid))
                    .map(move |o| (*k, o.name().to_string()))
            })
            .collect();
        for (dep_kind, dep_name) in dependents {
            debug!("Cascading delete to {} {}", dep_kind, dep_name);
            self.delete_object(dep_kind, &dep_name);
        }
    }
}

/// Versioned object store held entirely in memory
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<Vec<Fault>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self::from_snapshot(SnapshotData::default(), history_limit)
    }

    /// Restore a store from a snapshot. Watch history starts empty, so
    /// watchers must list first.
    pub fn from_snapshot(data: SnapshotData, history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = State {
            resource_version: data.resource_version,
            objects: BTreeMap::new(),
            history: VecDeque::new(),
            compacted: data.resource_version,
            history_limit: history_limit.max(1),
            events,
        };
        for object in data.objects {
            state.insert(object);
        }

        Self {
            state: Mutex::new(state),
            faults: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Copy every object and the current version
    pub async fn snapshot(&self) -> SnapshotData {
        let state = self.state.lock().await;
        SnapshotData {
            resource_version: state.resource_version,
            objects: state
                .objects
                .values()
                .flat_map(|m| m.values().cloned())
                .collect(),
        }
    }

    pub async fn resource_version(&self) -> u64 {
        self.state.lock().await.resource_version
    }

    /// Make the next `times` calls of `op` on `kind` fail with `error`
    pub async fn inject_fault(&self, op: FaultOp, kind: Kind, error: StoreError, times: usize) {
        self.faults.lock().await.push(Fault {
            op,
            kind,
            error,
            remaining: times,
        });
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            status_updates: self.counters.status_updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    async fn check_fault(&self, op: FaultOp, kind: Kind) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().await;
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.op == op && f.kind == kind && f.remaining > 0)
        {
            fault.remaining -= 1;
            return Err(fault.error.clone());
        }
        faults.retain(|f| f.remaining > 0);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(object: &Object, reason: String) -> StoreError {
    StoreError::Invalid {
        kind: object.kind(),
        name: object.name().to_string(),
        reason,
    }
}

fn check_version(stored: &Object, presented: &Object) -> Result<(), StoreError> {
    if stored.meta().resource_version != presented.meta().resource_version {
        return Err(StoreError::Conflict {
            kind: stored.kind(),
            name: stored.name().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(
        &self,
        kind: Kind,
        selector: Option<&LabelSelector>,
    ) -> Result<ObjectList, StoreError> {
        self.check_fault(FaultOp::List, kind).await?;

        let state = self.state.lock().await;
        let items = state
            .objects
            .get(&kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| selector.map_or(true, |s| s.matches(&o.meta().labels)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(ObjectList {
            items,
            resource_version: state.resource_version,
        })
    }

    async fn get(&self, kind: Kind, name: &str) -> Result<Object, StoreError> {
        self.check_fault(FaultOp::Get, kind).await?;

        let state = self.state.lock().await;
        state
            .get(kind, name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn watch(&self, kind: Kind, since: u64) -> Result<WatchStream, StoreError> {
        let (replay, rx) = {
            let state = self.state.lock().await;
            if since < state.compacted {
                return Err(StoreError::Expired(since));
            }
            let rx = state.events.subscribe();
            let replay: Vec<WatchEvent> = state
                .history
                .iter()
                .filter(|e| e.resource_version > since && e.object.kind() == kind)
                .cloned()
                .collect();
            (replay, rx)
        };

        let last = replay.last().map_or(since, |e| e.resource_version);
        let live = futures::stream::unfold(Some((rx, last)), move |state| async move {
            let (mut rx, last) = state?;
            loop {
                match rx.recv().await {
                    Ok(event) if event.object.kind() == kind && event.resource_version > last => {
                        let rv = event.resource_version;
                        return Some((Ok(event), Some((rx, rv))));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Watcher on {} lagged by {} events", kind, skipped);
                        return Some((Err(StoreError::Expired(last)), None));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures::stream::iter(replay.into_iter().map(Ok))
            .chain(live)
            .boxed())
    }

    async fn create(&self, mut object: Object) -> Result<Object, StoreError> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.check_fault(FaultOp::Create, object.kind()).await?;
        object.validate().map_err(|r| invalid(&object, r))?;

        let mut state = self.state.lock().await;
        if state.get(object.kind(), object.name()).is_some() {
            return Err(StoreError::AlreadyExists {
                kind: object.kind(),
                name: object.name().to_string(),
            });
        }

        let rv = state.next_version();
        let meta = object.meta_mut();
        meta.uid = uuid::Uuid::new_v4().to_string();
        meta.resource_version = rv;
        meta.generation = 1;
        meta.creation_timestamp = current_time_millis();
        meta.deletion_timestamp = None;

        state.insert(object.clone());
        state.record(EventType::Added, object.clone());
        Ok(object)
    }

    async fn update(&self, object: Object) -> Result<Object, StoreError> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        let kind = object.kind();
        self.check_fault(FaultOp::Update, kind).await?;

        let mut state = self.state.lock().await;
        let stored = state
            .get(kind, object.name())
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: object.name().to_string(),
            })?;
        check_version(stored, &object)?;
        object
            .validate_update(stored)
            .map_err(|r| invalid(&object, r))?;

        let mut next = object;
        next.copy_status_from(stored);
        let spec_changed = next.spec_differs(stored);
        {
            let old = stored.meta();
            let (uid, created, deleting, generation) = (
                old.uid.clone(),
                old.creation_timestamp,
                old.deletion_timestamp,
                old.generation,
            );
            let meta = next.meta_mut();
            meta.uid = uid;
            meta.creation_timestamp = created;
            meta.deletion_timestamp = deleting;
            meta.generation = if spec_changed { generation + 1 } else { generation };
        }

        if &next == stored {
            return Ok(next);
        }

        if next.meta().is_deleting() && next.meta().finalizers.is_empty() {
            let name = next.name().to_string();
            state.remove_object(kind, &name);
            return Ok(next);
        }

        let rv = state.next_version();
        next.meta_mut().resource_version = rv;
        state.insert(next.clone());
        state.record(EventType::Modified, next.clone());
        Ok(next)
    }

    async fn update_status(&self, object: Object) -> Result<Object, StoreError> {
        self.counters.status_updates.fetch_add(1, Ordering::Relaxed);
        let kind = object.kind();
        self.check_fault(FaultOp::UpdateStatus, kind).await?;
        if kind == Kind::Template {
            return Err(invalid(&object, "templates have no status".to_string()));
        }

        let mut state = self.state.lock().await;
        let stored = state
            .get(kind, object.name())
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: object.name().to_string(),
            })?;
        check_version(stored, &object)?;

        let mut next = stored.clone();
        next.copy_status_from(&object);
        if &next == stored {
            return Ok(next);
        }

        let rv = state.next_version();
        next.meta_mut().resource_version = rv;
        state.insert(next.clone());
        state.record(EventType::Modified, next.clone());
        Ok(next)
    }

    async fn delete(
        &self,
        kind: Kind,
        name: &str,
        preconditions: Preconditions,
    ) -> Result<DeleteOutcome, StoreError> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_fault(FaultOp::Delete, kind).await?;

        let mut state = self.state.lock().await;
        let stored = state.get(kind, name).ok_or_else(|| StoreError::NotFound {
            kind,
            name: name.to_string(),
        })?;
        if let Some(expected) = preconditions.resource_version {
            if stored.meta().resource_version != expected {
                return Err(StoreError::Conflict {
                    kind,
                    name: name.to_string(),
                });
            }
        }

        state
            .delete_object(kind, name)
            .ok_or_else(|| StoreError::Internal(format!("{} {} vanished during delete", kind, name)))
    }
}
