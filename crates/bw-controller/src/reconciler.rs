//! Per-instance reconciliation
//!
//! [`Reconciler::reconcile`] reads the instance, its template, pod and
//! claim fresh from the store, converges the pod and claim onto the desired
//! state and writes the observed phase back to the instance status. It
//! issues no writes when nothing changed. Retries, budgets and failing an
//! instance are decided by the caller from the returned error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use bw_core::config::ControllerConfig;
use bw_core::naming::{claim_name, pod_name};
use bw_core::time::current_time_millis;
use bw_core::traits::{DeleteOutcome, ResourceStore};
use bw_core::{
    FailureReason, Instance, PersistentVolumeClaim, Phase, Pod, Resource, StoreError, Template,
    TEARDOWN_FINALIZER,
};
use bw_store::Api;

use crate::desired;
use crate::error::ReconcileError;

/// What the caller should do with the key after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Steady state reached; any retry history can be dropped
    Converged,
    /// Progress depends on a change that will arrive as a watch event
    Await,
    /// Look again after the given delay
    RequeueAfter(Duration),
}

/// Status fields owned by the controller
#[derive(Debug, Clone, PartialEq)]
struct StatusUpdate {
    phase: Phase,
    pod_ref: Option<String>,
    volume_ref: Option<String>,
    message: Option<String>,
    failure: Option<FailureReason>,
}

impl StatusUpdate {
    fn new(phase: Phase, pod_ref: Option<String>, volume_ref: Option<String>) -> Self {
        Self {
            phase,
            pod_ref,
            volume_ref,
            message: None,
            failure: None,
        }
    }

    fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Returns whether the instance changed
fn apply_status(instance: &mut Instance, update: &StatusUpdate) -> bool {
    let status = &instance.status;
    if status.phase == update.phase
        && status.pod_ref == update.pod_ref
        && status.volume_ref == update.volume_ref
        && status.message == update.message
        && status.failure == update.failure
    {
        return false;
    }
    if !status.phase.can_transition_to(update.phase) {
        warn!(
            "Refusing phase change {} -> {} for instance {}",
            status.phase,
            update.phase,
            instance.name()
        );
        return false;
    }

    if status.phase != update.phase {
        info!(
            "Instance {} {} -> {}",
            instance.name(),
            status.phase,
            update.phase
        );
        instance.status.last_transition = current_time_millis();
    }
    instance.status.phase = update.phase;
    instance.status.pod_ref = update.pod_ref.clone();
    instance.status.volume_ref = update.volume_ref.clone();
    instance.status.message = update.message.clone();
    instance.status.failure = update.failure.clone();
    true
}

/// Delete `name`, treating absence as done. Returns whether it is gone.
async fn remove<K: Resource>(api: &Api<K>, name: &str) -> Result<bool, StoreError> {
    match api.delete(name).await {
        Ok(DeleteOutcome::Deleted) => {
            info!("Deleted {} {}", K::KIND, name);
            Ok(true)
        }
        Ok(DeleteOutcome::Pending(_)) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(e),
    }
}

/// Drives one instance at a time towards its desired state
pub struct Reconciler {
    config: ControllerConfig,
    instances: Api<Instance>,
    templates: Api<Template>,
    pods: Api<Pod>,
    claims: Api<PersistentVolumeClaim>,
}

impl Reconciler {
    pub fn new(config: ControllerConfig, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            config,
            instances: Api::new(store.clone()),
            templates: Api::new(store.clone()),
            pods: Api::new(store.clone()),
            claims: Api::new(store),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    async fn write_status(&self, name: &str, update: StatusUpdate) -> Result<(), StoreError> {
        let update = &update;
        self.instances
            .patch_status(name, |inst| apply_status(inst, update))
            .await?;
        Ok(())
    }

    /// Converge one instance
    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcileError> {
        let Some(instance) = self.instances.get_opt(name).await? else {
            debug!("Instance {} is gone, nothing to do", name);
            return Ok(Action::Converged);
        };

        if instance.metadata.is_deleting() {
            return self.teardown(&instance).await;
        }
        let instance = self.ensure_finalizer(instance).await?;
        if matches!(
            instance.phase(),
            Phase::Failed | Phase::Terminating | Phase::Deleted
        ) {
            return Ok(Action::Converged);
        }

        let template = match &instance.spec.template {
            Some(t) => self.templates.get_opt(t).await?,
            None => None,
        };
        let spec = match desired::effective_spec(&instance, template.as_ref(), &self.config) {
            Ok(spec) => spec,
            Err(reason) if template.is_none() && instance.spec.template.is_some() => {
                return self.without_template(&instance, reason).await;
            }
            Err(reason) => return Err(ReconcileError::InvalidSpec(reason)),
        };

        let volume_ref = match desired::desired_claim(&instance, &spec) {
            Some(claim) => {
                let claim_ref = claim.name().to_string();
                if !self.ensure_claim(claim).await? {
                    self.write_status(
                        name,
                        StatusUpdate::new(Phase::Provisioning, None, Some(claim_ref))
                            .message("waiting for the previous volume to be released"),
                    )
                    .await?;
                    return Ok(Action::Await);
                }
                Some(claim_ref)
            }
            None => None,
        };

        let pod_ref = pod_name(name);
        let status = |phase: Phase| StatusUpdate::new(phase, Some(pod_ref.clone()), volume_ref.clone());

        let Some(pod) = self.pods.get_opt(&pod_ref).await? else {
            if let Err(e) = self.pods.create(desired::desired_pod(&instance, &spec)).await {
                if !e.is_already_exists() {
                    self.write_status(
                        name,
                        status(Phase::Provisioning).message(format!("creating pod: {}", e)),
                    )
                    .await?;
                    return Err(e.into());
                }
            } else {
                info!("Created pod {} for instance {}", pod_ref, name);
            }
            self.write_status(
                name,
                status(Phase::Provisioning).message("waiting for the pod to start"),
            )
            .await?;
            return Ok(Action::Await);
        };

        if pod.metadata.is_deleting() {
            self.write_status(
                name,
                status(Phase::Provisioning).message("waiting for the old pod to terminate"),
            )
            .await?;
            return Ok(Action::Await);
        }

        if pod.has_exited() {
            warn!(
                "Pod {} of instance {} exited ({:?}), replacing it",
                pod_ref, name, pod.status.phase
            );
            remove(&self.pods, &pod_ref).await?;
            self.write_status(
                name,
                status(Phase::Provisioning).message("pod exited, recreating"),
            )
            .await?;
            return Err(ReconcileError::PodExited(pod_ref));
        }

        if pod.is_unschedulable() {
            let reason = pod
                .status
                .message
                .clone()
                .unwrap_or_else(|| "no node has room".to_string());
            self.write_status(
                name,
                status(Phase::Provisioning).message(format!("waiting for capacity: {}", reason)),
            )
            .await?;
            return Err(ReconcileError::Unschedulable(reason));
        }

        if pod.is_running_and_ready() {
            self.write_status(name, status(Phase::Ready)).await?;
            return Ok(Action::Converged);
        }

        self.write_status(
            name,
            status(Phase::Provisioning).message("waiting for the pod to start"),
        )
        .await?;
        Ok(Action::Await)
    }

    /// The template is gone. A live pod keeps serving the instance; only
    /// when it is missing or has exited does the instance fail.
    async fn without_template(
        &self,
        instance: &Instance,
        reason: String,
    ) -> Result<Action, ReconcileError> {
        let name = instance.name();
        let pod_ref = pod_name(name);
        let pod = match self.pods.get_opt(&pod_ref).await? {
            Some(pod) if !pod.metadata.is_deleting() && !pod.has_exited() => pod,
            _ => return Err(ReconcileError::InvalidSpec(reason)),
        };

        let (phase, action) = if pod.is_running_and_ready() {
            (Phase::Ready, Action::Converged)
        } else {
            (Phase::Provisioning, Action::Await)
        };
        debug!("Instance {} keeps pod {}: {}", name, pod_ref, reason);
        self.write_status(
            name,
            StatusUpdate::new(phase, Some(pod_ref), instance.status.volume_ref.clone())
                .message(reason),
        )
        .await?;
        Ok(action)
    }

    async fn ensure_finalizer(&self, instance: Instance) -> Result<Instance, StoreError> {
        if instance.metadata.has_finalizer(TEARDOWN_FINALIZER) {
            return Ok(instance);
        }
        self.instances
            .patch(instance.name(), |inst| {
                if inst.metadata.has_finalizer(TEARDOWN_FINALIZER) {
                    return false;
                }
                inst.metadata.finalizers.push(TEARDOWN_FINALIZER.to_string());
                true
            })
            .await
    }

    /// Create the claim if missing. Returns false while an older claim of
    /// the same name is still being deleted.
    async fn ensure_claim(&self, claim: PersistentVolumeClaim) -> Result<bool, StoreError> {
        match self.claims.get_opt(claim.name()).await? {
            Some(existing) => Ok(!existing.metadata.is_deleting()),
            None => {
                let name = claim.name().to_string();
                match self.claims.create(claim).await {
                    Ok(_) => info!("Created claim {}", name),
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e),
                }
                Ok(true)
            }
        }
    }

    /// Remove the pod and, unless the kind retains it, the volume; then
    /// release the finalizer so the store drops the instance.
    async fn teardown(&self, instance: &Instance) -> Result<Action, ReconcileError> {
        let name = instance.name();
        if !instance.metadata.has_finalizer(TEARDOWN_FINALIZER) {
            return Ok(Action::Converged);
        }

        let retained = instance.spec.kind.policy().volume_retained_on_delete;
        let claim_ref = instance
            .status
            .volume_ref
            .clone()
            .unwrap_or_else(|| claim_name(name));

        if instance.phase() != Phase::Deleted {
            let mut update = StatusUpdate::new(
                Phase::Terminating,
                instance.status.pod_ref.clone(),
                instance.status.volume_ref.clone(),
            )
            .message("tearing down");
            update.failure = instance.status.failure.clone();
            self.write_status(name, update).await?;
        }

        if !remove(&self.pods, &pod_name(name)).await? {
            return Ok(Action::Await);
        }
        if retained {
            if instance.status.volume_ref.is_some() {
                info!("Keeping volume {} of instance {}", claim_ref, name);
            }
        } else if !remove(&self.claims, &claim_ref).await? {
            return Ok(Action::Await);
        }

        let mut update = StatusUpdate::new(
            Phase::Deleted,
            None,
            retained.then(|| instance.status.volume_ref.clone()).flatten(),
        );
        update.failure = instance.status.failure.clone();
        self.write_status(name, update).await?;

        match self
            .instances
            .patch(name, |inst| {
                let before = inst.metadata.finalizers.len();
                inst.metadata.finalizers.retain(|f| f != TEARDOWN_FINALIZER);
                inst.metadata.finalizers.len() != before
            })
            .await
        {
            Ok(_) => info!("Instance {} deleted", name),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Action::Converged)
    }

    /// Mark an instance Failed and free the node slot its pod held
    pub async fn fail(&self, name: &str, reason: FailureReason) -> Result<(), StoreError> {
        let Some(instance) = self.instances.get_opt(name).await? else {
            return Ok(());
        };
        if instance.metadata.is_deleting() {
            return Ok(());
        }

        warn!("Instance {} failed: {}", name, reason);
        let mut update = StatusUpdate::new(Phase::Failed, None, instance.status.volume_ref.clone())
            .message(reason.message.clone());
        update.failure = Some(reason);
        self.write_status(name, update).await?;

        remove(&self.pods, &pod_name(name)).await?;
        Ok(())
    }
}
