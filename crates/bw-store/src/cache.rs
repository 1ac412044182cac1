//! Watch-fed local cache of one resource kind
//!
//! The cache lists the kind once, then follows a watch from the listed
//! version. When the watch fails or expires it relists with backoff. Reads
//! are eventually consistent; writers must still present resource versions
//! to the store.

use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bw_core::traits::{EventType, ResourceStore, WatchEvent};
use bw_core::{Resource, StoreError};

const RELIST_INITIAL_DELAY: Duration = Duration::from_millis(200);
const RELIST_MAX_DELAY: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 1024;

/// Change observed by a cache
#[derive(Debug, Clone)]
pub enum CacheEvent<K> {
    /// Object added or modified
    Applied(K),
    /// Object removed; carries its last state
    Deleted(K),
}

impl<K: Resource> CacheEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            CacheEvent::Applied(o) | CacheEvent::Deleted(o) => o,
        }
    }
}

/// Eventually consistent local copy of every object of kind `K`
pub struct Cache<K: Resource> {
    store: Arc<dyn ResourceStore>,
    items: DashMap<String, K>,
    version: AtomicU64,
    synced: watch::Sender<bool>,
    events: broadcast::Sender<CacheEvent<K>>,
}

impl<K: Resource> Cache<K> {
    pub fn new(store: Arc<dyn ResourceStore>) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            store,
            items: DashMap::new(),
            version: AtomicU64::new(0),
            synced,
            events,
        })
    }

    /// Keep the cache in sync until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut delay = RELIST_INITIAL_DELAY;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.list_and_watch(&mut delay) => result,
            };

            match result {
                Ok(()) => debug!("{} watch ended, relisting", K::KIND),
                Err(StoreError::Expired(v)) => {
                    debug!("{} watch expired at version {}, relisting", K::KIND, v)
                }
                Err(e) => {
                    warn!("{} cache sync failed: {}; retrying in {:?}", K::KIND, e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = std::cmp::min(delay * 2, RELIST_MAX_DELAY);
                }
            }
        }
        debug!("{} cache stopped", K::KIND);
    }

    async fn list_and_watch(&self, delay: &mut Duration) -> Result<(), StoreError> {
        let listed = self.store.list(K::KIND, None).await?;
        *delay = RELIST_INITIAL_DELAY;
        let version = listed.resource_version;

        let fresh: Vec<K> = listed
            .items
            .into_iter()
            .filter_map(K::try_from_object)
            .collect();
        self.replace_all(fresh, version);
        self.synced.send_replace(true);

        let mut stream = self.store.watch(K::KIND, version).await?;
        while let Some(event) = stream.next().await {
            self.apply(event?);
        }
        Ok(())
    }

    fn replace_all(&self, fresh: Vec<K>, version: u64) {
        let stale: Vec<String> = self
            .items
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| !fresh.iter().any(|o| o.name() == name))
            .collect();
        for name in stale {
            if let Some((_, gone)) = self.items.remove(&name) {
                let _ = self.events.send(CacheEvent::Deleted(gone));
            }
        }

        for object in fresh {
            let changed = self
                .items
                .get(object.name())
                .map_or(true, |cur| {
                    cur.meta().resource_version != object.meta().resource_version
                });
            if changed {
                self.items.insert(object.name().to_string(), object.clone());
                let _ = self.events.send(CacheEvent::Applied(object));
            }
        }
        self.version.store(version, Ordering::SeqCst);
    }

    fn apply(&self, event: WatchEvent) {
        if event.resource_version <= self.version.load(Ordering::SeqCst) {
            return;
        }
        let version = event.resource_version;
        let Some(object) = K::try_from_object(event.object) else {
            return;
        };

        match event.event_type {
            EventType::Added | EventType::Modified => {
                self.items.insert(object.name().to_string(), object.clone());
                let _ = self.events.send(CacheEvent::Applied(object));
            }
            EventType::Deleted => {
                self.items.remove(object.name());
                let _ = self.events.send(CacheEvent::Deleted(object));
            }
        }
        self.version.store(version, Ordering::SeqCst);
    }

    /// Get an object by name
    pub fn get(&self, name: &str) -> Option<K> {
        self.items.get(name).map(|o| o.clone())
    }

    /// All objects, sorted by name
    pub fn list(&self) -> Vec<K> {
        let mut items: Vec<K> = self.items.iter().map(|o| o.value().clone()).collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Version of the last change applied
    pub fn resource_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Receive every change applied after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.events.subscribe()
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait for the first successful list
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as self, so this only ends once synced
        let _ = rx.wait_for(|synced| *synced).await;
    }
}
