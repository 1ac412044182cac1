//! Local node: pod admission and claim binding
//!
//! The runtime follows Pods and PersistentVolumeClaims through watch-fed
//! caches. Claims are bound to directories under the node's data dir. Pods
//! are admitted while the node has capacity and their claim is bound;
//! beyond `max_pods` they stay Pending with reason `Unschedulable` until a
//! slot frees up. Deleting a pod kills every session running in it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use bw_core::config::NodeConfig;
use bw_core::time::current_time_millis;
use bw_core::traits::ResourceStore;
use bw_core::{ClaimPhase, PersistentVolumeClaim, Pod, PodPhase, StoreError};
use bw_core::model::REASON_UNSCHEDULABLE;
use bw_store::{Api, Cache, CacheEvent};

use crate::exec::LocalExecutor;
use crate::sessions::SessionRegistry;

/// Admits pods and binds claims for the local backend
pub struct NodeRuntime {
    config: NodeConfig,
    pods: Api<Pod>,
    claims: Api<PersistentVolumeClaim>,
    pod_cache: Arc<Cache<Pod>>,
    claim_cache: Arc<Cache<PersistentVolumeClaim>>,
    sessions: Arc<SessionRegistry>,
    /// Pods holding a slot on this node
    admitted: Mutex<HashSet<String>>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig, store: Arc<dyn ResourceStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            pods: Api::new(store.clone()),
            claims: Api::new(store.clone()),
            pod_cache: Cache::new(store.clone()),
            claim_cache: Cache::new(store),
            sessions: Arc::new(SessionRegistry::new()),
            admitted: Mutex::new(HashSet::new()),
        })
    }

    /// Executor for the pods this node runs
    pub fn executor(&self) -> LocalExecutor {
        LocalExecutor::new(
            self.config.clone(),
            self.pods.clone(),
            self.claims.clone(),
            self.sessions.clone(),
        )
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Number of pods currently holding a slot
    pub async fn admitted_count(&self) -> usize {
        self.admitted.lock().await.len()
    }

    /// Run until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut pod_events = self.pod_cache.subscribe();
        let mut claim_events = self.claim_cache.subscribe();
        tokio::spawn(self.pod_cache.clone().run(cancel.clone()));
        tokio::spawn(self.claim_cache.clone().run(cancel.clone()));

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = async {
                self.pod_cache.wait_synced().await;
                self.claim_cache.wait_synced().await;
            } => {}
        }
        tracing::info!(
            "Node {} ready ({} pods max, volumes under {})",
            self.config.name,
            self.config.max_pods,
            self.config.data_dir.display()
        );

        self.seed_admitted().await;
        self.sync_all().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = pod_events.recv() => match event {
                    Ok(CacheEvent::Deleted(pod)) => {
                        self.release(&pod).await;
                        self.schedule_pending().await;
                    }
                    Ok(CacheEvent::Applied(_)) => self.schedule_pending().await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Node fell {} pod events behind, resyncing", n);
                        self.sync_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = claim_events.recv() => match event {
                    Ok(CacheEvent::Applied(claim)) => {
                        self.bind_claim(&claim).await;
                        self.schedule_pending().await;
                    }
                    Ok(CacheEvent::Deleted(claim)) => self.release_claim(&claim).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => self.sync_all().await,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Node {} stopped", self.config.name);
    }

    async fn seed_admitted(&self) {
        let mut admitted = self.admitted.lock().await;
        for pod in self.pod_cache.list() {
            if pod.status.phase == PodPhase::Running {
                admitted.insert(pod.name().to_string());
            }
        }
    }

    async fn sync_all(&self) {
        for claim in self.claim_cache.list() {
            self.bind_claim(&claim).await;
        }
        self.schedule_pending().await;
    }

    fn volume_dir(&self, claim: &str) -> PathBuf {
        self.config.data_dir.join(claim)
    }

    async fn bind_claim(&self, claim: &PersistentVolumeClaim) {
        if claim.status.phase != ClaimPhase::Pending || claim.metadata.is_deleting() {
            return;
        }

        let dir = self.volume_dir(claim.name());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!("Failed to create volume for claim {}: {}", claim.name(), e);
            return;
        }

        let path = dir.to_string_lossy().to_string();
        let result = self
            .claims
            .patch_status(claim.name(), |c| {
                if c.status.phase == ClaimPhase::Bound {
                    return false;
                }
                c.status.phase = ClaimPhase::Bound;
                c.status.volume_path = Some(path.clone());
                true
            })
            .await;
        match result {
            Ok(_) => tracing::info!("Bound claim {} to {}", claim.name(), dir.display()),
            Err(e) => log_write_error("bind claim", claim.name(), &e),
        }
    }

    async fn release_claim(&self, claim: &PersistentVolumeClaim) {
        let dir = self.volume_dir(claim.name());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!("Released volume of claim {}", claim.name()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove volume {}: {}", dir.display(), e),
        }
    }

    async fn release(&self, pod: &Pod) {
        let freed = self.admitted.lock().await.remove(pod.name());
        let killed = self.sessions.kill_pod(pod.name());
        if freed || killed > 0 {
            tracing::info!("Pod {} removed ({} sessions killed)", pod.name(), killed);
        }
    }

    /// Admit pending pods while there is room, mark the rest Unschedulable
    async fn schedule_pending(&self) {
        let mut pending: Vec<Pod> = self
            .pod_cache
            .list()
            .into_iter()
            .filter(|p| p.status.phase == PodPhase::Pending && !p.metadata.is_deleting())
            .collect();
        pending.sort_by_key(|p| p.metadata.creation_timestamp);

        for pod in pending {
            if !self.claim_ready(&pod) {
                continue;
            }

            let admitted = {
                let mut admitted = self.admitted.lock().await;
                if admitted.contains(pod.name()) {
                    continue;
                }
                if admitted.len() < self.config.max_pods {
                    admitted.insert(pod.name().to_string());
                    true
                } else {
                    false
                }
            };

            if admitted {
                self.start(pod).await;
            } else {
                self.mark_unschedulable(&pod).await;
            }
        }
    }

    fn claim_ready(&self, pod: &Pod) -> bool {
        match &pod.spec.volume {
            None => true,
            Some(mount) => self
                .claim_cache
                .get(&mount.claim_name)
                .is_some_and(|c| c.is_bound()),
        }
    }

    async fn start(&self, pod: Pod) {
        let delay = self.config.startup_delay_ms;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let node = self.config.name.clone();
        let result = self
            .pods
            .patch_status(pod.name(), |p| {
                if p.status.phase == PodPhase::Running && p.status.ready {
                    return false;
                }
                p.status.phase = PodPhase::Running;
                p.status.ready = true;
                p.status.reason = None;
                p.status.message = None;
                p.status.node = Some(node.clone());
                p.status.started_at = Some(current_time_millis());
                true
            })
            .await;

        match result {
            Ok(_) => tracing::info!("Pod {} running on {}", pod.name(), self.config.name),
            Err(e) => {
                self.admitted.lock().await.remove(pod.name());
                log_write_error("start pod", pod.name(), &e);
            }
        }
    }

    async fn mark_unschedulable(&self, pod: &Pod) {
        let message = format!(
            "node {} is at capacity ({} pods)",
            self.config.name, self.config.max_pods
        );
        let result = self
            .pods
            .patch_status(pod.name(), |p| {
                if p.status.phase != PodPhase::Pending
                    || p.status.reason.as_deref() == Some(REASON_UNSCHEDULABLE)
                {
                    return false;
                }
                p.status.reason = Some(REASON_UNSCHEDULABLE.to_string());
                p.status.message = Some(message.clone());
                true
            })
            .await;
        match result {
            Ok(_) => tracing::debug!("Pod {} unschedulable: {}", pod.name(), message),
            Err(e) => log_write_error("mark pod unschedulable", pod.name(), &e),
        }
    }
}

fn log_write_error(action: &str, name: &str, error: &StoreError) {
    if error.is_not_found() {
        tracing::debug!("Could not {} {}: already gone", action, name);
    } else {
        tracing::warn!("Could not {} {}: {}", action, name, error);
    }
}
