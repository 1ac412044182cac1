//! Controller runtime
//!
//! Wires the caches, event pumps, periodic resync, idle sweep and the
//! worker pool around a [`Reconciler`]. Every reconcile runs in its own
//! task, so a panic fails that attempt only and is retried with backoff.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bw_core::config::ControllerConfig;
use bw_core::time::current_time_millis;
use bw_core::traits::ResourceStore;
use bw_core::{
    FailureReason, Instance, PersistentVolumeClaim, Pod, Resource, Template, INSTANCE_LABEL,
};
use bw_store::{Cache, CacheEvent};

use crate::error::ReconcileError;
use crate::gc::IdleCollector;
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};

/// Instance fields whose change needs a reconcile. Status is not among
/// them: the controller's own writes and session touches only change status.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Trigger {
    generation: u64,
    deleting: bool,
    finalizers: Vec<String>,
}

impl Trigger {
    fn of(instance: &Instance) -> Self {
        Self {
            generation: instance.metadata.generation,
            deleting: instance.metadata.is_deleting(),
            finalizers: instance.metadata.finalizers.clone(),
        }
    }
}

pub struct Controller {
    config: ControllerConfig,
    instances: Arc<Cache<Instance>>,
    templates: Arc<Cache<Template>>,
    pods: Arc<Cache<Pod>>,
    claims: Arc<Cache<PersistentVolumeClaim>>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    collector: IdleCollector,
}

impl Controller {
    pub fn new(config: ControllerConfig, store: Arc<dyn ResourceStore>) -> Arc<Self> {
        Arc::new(Self {
            instances: Cache::new(store.clone()),
            templates: Cache::new(store.clone()),
            pods: Cache::new(store.clone()),
            claims: Cache::new(store.clone()),
            queue: WorkQueue::new(config.backoff.clone()),
            reconciler: Arc::new(Reconciler::new(config.clone(), store.clone())),
            collector: IdleCollector::new(store, config.default_idle_timeout),
            config,
        })
    }

    pub fn instance_cache(&self) -> &Arc<Cache<Instance>> {
        &self.instances
    }

    pub fn template_cache(&self) -> &Arc<Cache<Template>> {
        &self.templates
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn collector(&self) -> &IdleCollector {
        &self.collector
    }

    /// Run until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let instance_events = self.instances.subscribe();
        let template_events = self.templates.subscribe();
        let pod_events = self.pods.subscribe();
        let claim_events = self.claims.subscribe();

        let mut tasks = JoinSet::new();
        tasks.spawn(self.instances.clone().run(cancel.clone()));
        tasks.spawn(self.templates.clone().run(cancel.clone()));
        tasks.spawn(self.pods.clone().run(cancel.clone()));
        tasks.spawn(self.claims.clone().run(cancel.clone()));

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = async {
                self.instances.wait_synced().await;
                self.templates.wait_synced().await;
                self.pods.wait_synced().await;
                self.claims.wait_synced().await;
            } => {}
        }
        info!(
            "Controller synced ({} instances, {} templates); starting {} workers",
            self.instances.len(),
            self.templates.len(),
            self.config.workers
        );
        self.enqueue_all().await;

        tasks.spawn(self.clone().pump_instances(instance_events, cancel.clone()));
        tasks.spawn(self.clone().pump_templates(template_events, cancel.clone()));
        tasks.spawn(self.clone().pump_owned(pod_events, cancel.clone()));
        tasks.spawn(self.clone().pump_owned(claim_events, cancel.clone()));
        tasks.spawn(self.clone().resync_loop(cancel.clone()));
        tasks.spawn(self.clone().gc_loop(cancel.clone()));
        for id in 0..self.config.workers.max(1) {
            tasks.spawn(self.clone().worker(id, cancel.clone()));
        }

        cancel.cancelled().await;
        self.queue.shutdown().await;
        while tasks.join_next().await.is_some() {}
        info!("Controller stopped");
    }

    async fn enqueue_all(&self) {
        for instance in self.instances.list() {
            self.queue.add(instance.name()).await;
        }
    }

    async fn pump_instances(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<CacheEvent<Instance>>,
        cancel: CancellationToken,
    ) {
        let mut seen: HashMap<String, Trigger> = HashMap::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(CacheEvent::Applied(instance)) => {
                    let trigger = Trigger::of(&instance);
                    if seen.get(instance.name()) != Some(&trigger) {
                        seen.insert(instance.name().to_string(), trigger);
                        self.queue.add(instance.name()).await;
                    }
                }
                Ok(CacheEvent::Deleted(instance)) => {
                    seen.remove(instance.name());
                    self.queue.add(instance.name()).await;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Instance events lagged by {}, re-enqueueing all", n);
                    self.enqueue_all().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn pump_templates(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<CacheEvent<Template>>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    let template = event.object().name();
                    for instance in self.instances.list() {
                        if instance.spec.template.as_deref() == Some(template) {
                            self.queue.add(instance.name()).await;
                        }
                    }
                }
                Err(RecvError::Lagged(_)) => self.enqueue_all().await,
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Map pod and claim changes to the instance named in their label
    async fn pump_owned<K: Resource>(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<CacheEvent<K>>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some(instance) = event.object().meta().label(INSTANCE_LABEL) {
                        self.queue.add(instance).await;
                    }
                }
                Err(RecvError::Lagged(_)) => self.enqueue_all().await,
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn resync_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Resync: enqueueing {} instances", self.instances.len());
                    self.enqueue_all().await;
                }
            }
        }
    }

    async fn gc_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.gc_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let collected = self.collector.sweep(current_time_millis()).await;
                    if !collected.is_empty() {
                        info!("Idle sweep collected {} instances", collected.len());
                    }
                }
            }
        }
    }

    async fn worker(self: Arc<Self>, id: usize, cancel: CancellationToken) {
        debug!("Worker {} started", id);
        loop {
            let key = tokio::select! {
                _ = cancel.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            let reconciler = self.reconciler.clone();
            let name = key.clone();
            let outcome = match tokio::spawn(async move { reconciler.reconcile(&name).await }).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Reconcile of {} aborted: {}", key, e);
                    Err(ReconcileError::Panicked)
                }
            };
            self.handle_outcome(&key, outcome).await;
            self.queue.done(&key).await;
        }
        debug!("Worker {} stopped", id);
    }

    async fn handle_outcome(&self, key: &str, outcome: Result<Action, ReconcileError>) {
        match outcome {
            Ok(Action::Converged) => self.queue.forget(key).await,
            Ok(Action::Await) => {}
            Ok(Action::RequeueAfter(delay)) => self.queue.add_after(key, delay),
            Err(e) if e.is_conflict() => {
                debug!("Reconcile of {} lost a write race, requeueing", key);
                self.queue.add(key).await;
            }
            Err(e) if e.is_terminal() => self.fail(key, &e).await,
            Err(e) => {
                let attempts = self.queue.failures(key).await + 1;
                if attempts >= self.config.retry_budget {
                    self.fail(key, &e).await;
                } else {
                    let delay = self.queue.add_rate_limited(key).await;
                    info!(
                        "Reconcile of {} failed (attempt {}/{}): {}; retrying in {:?}",
                        key, attempts, self.config.retry_budget, e, delay
                    );
                }
            }
        }
    }

    async fn fail(&self, key: &str, cause: &ReconcileError) {
        let attempts = self.queue.failures(key).await + 1;
        let message = if cause.is_terminal() {
            cause.to_string()
        } else {
            format!("gave up after {} attempts: {}", attempts, cause)
        };
        let reason = FailureReason::new(cause.failure_category(), message);
        match self.reconciler.fail(key, reason).await {
            Ok(()) => self.queue.forget(key).await,
            Err(e) => {
                warn!("Could not mark {} failed: {}", key, e);
                self.queue.add_rate_limited(key).await;
            }
        }
    }
}
