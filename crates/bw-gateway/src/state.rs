//! Shared gateway state

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bw_core::config::GatewayConfig;
use bw_core::traits::{PodExecutor, ResourceStore};
use bw_core::{Instance, Template};
use bw_store::Cache;

use crate::auth::UserKeys;
use crate::router::Router;

/// Everything a connection handler or the IPC server needs
pub struct GatewayState {
    pub config: GatewayConfig,
    pub store: Arc<dyn ResourceStore>,
    pub router: Router,
    pub executor: Arc<dyn PodExecutor>,
    pub users: UserKeys,
    started: Instant,
    connections: AtomicUsize,
    sessions: AtomicUsize,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn ResourceStore>,
        templates: Arc<Cache<Template>>,
        instances: Arc<Cache<Instance>>,
        executor: Arc<dyn PodExecutor>,
        users: UserKeys,
    ) -> Self {
        let router = Router::new(
            templates,
            instances,
            store.clone(),
            config.provisioning_timeout,
        );
        Self {
            config,
            store,
            router,
            executor,
            users,
            started: Instant::now(),
            connections: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Counts an open SSH connection until the guard drops
    pub fn track_connection(self: &Arc<Self>) -> CountGuard {
        CountGuard::new(self.clone(), |s| &s.connections)
    }

    /// Counts a bridged session until the guard drops
    pub fn track_session(self: &Arc<Self>) -> CountGuard {
        CountGuard::new(self.clone(), |s| &s.sessions)
    }
}

pub struct CountGuard {
    state: Arc<GatewayState>,
    counter: fn(&GatewayState) -> &AtomicUsize,
}

impl CountGuard {
    fn new(state: Arc<GatewayState>, counter: fn(&GatewayState) -> &AtomicUsize) -> Self {
        counter(&state).fetch_add(1, Ordering::Relaxed);
        Self { state, counter }
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        (self.counter)(&self.state).fetch_sub(1, Ordering::Relaxed);
    }
}
