//! Session routing
//!
//! Turns a login into either the admin listing or a Ready instance. Logins
//! are resolved against the watch-fed caches; creation races are settled by
//! the store, since every `(owner, template)` pair maps to one instance name.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bw_core::naming::instance_name;
use bw_core::time::current_time_millis;
use bw_core::traits::ResourceStore;
use bw_core::{
    resolve, Catalog, FailureCategory, Instance, InstanceSpec, Intent, ObjectMeta, Phase,
    Template, APP_LABEL, OWNER_LABEL, TEMPLATE_LABEL,
};
use bw_store::{Api, Cache};

use crate::error::RouteError;

/// Where a login ends up
#[derive(Debug, Clone)]
pub enum Route {
    /// Bare-owner login: read-only listing
    Admin { owner: String },
    /// A Ready instance to bridge into
    Session(Instance),
}

pub struct Router {
    templates: Arc<Cache<Template>>,
    instances: Arc<Cache<Instance>>,
    api: Api<Instance>,
    provisioning_timeout: Duration,
}

impl Router {
    pub fn new(
        templates: Arc<Cache<Template>>,
        instances: Arc<Cache<Instance>>,
        store: Arc<dyn ResourceStore>,
        provisioning_timeout: Duration,
    ) -> Self {
        Self {
            templates,
            instances,
            api: Api::new(store),
            provisioning_timeout,
        }
    }

    pub fn templates(&self) -> &Arc<Cache<Template>> {
        &self.templates
    }

    pub fn instances(&self) -> &Arc<Cache<Instance>> {
        &self.instances
    }

    /// Resolve `login` and, for session intents, wait until the instance is
    /// Ready. Cancelling `cancel` abandons the wait, never the instance.
    pub async fn route(&self, login: &str, cancel: &CancellationToken) -> Result<Route, RouteError> {
        let templates = self.templates.list();
        let instances = self.instances.list();
        let resolved = resolve(
            login,
            Catalog {
                templates: &templates,
                instances: &instances,
            },
        )?;
        debug!("Login {} resolved to {:?}", login, resolved.intent);

        let instance = match resolved.intent {
            Intent::AdminSession => {
                return Ok(Route::Admin {
                    owner: resolved.owner,
                })
            }
            Intent::CreateFromTemplate(template) => {
                let template = templates
                    .into_iter()
                    .find(|t| t.name() == template)
                    .ok_or_else(|| {
                        RouteError::from(bw_core::ResolveError::UnknownSelector {
                            selector: template.clone(),
                        })
                    })?;
                self.create_from_template(&resolved.owner, &template, cancel)
                    .await?
            }
            Intent::AttachInstance(name) => self.attach(&name, cancel).await?,
        };

        self.touch(instance.name());
        Ok(Route::Session(instance))
    }

    /// Create the owner's instance of `template`, or join the one that
    /// already exists, then wait for it. Kinds that are not auto-created
    /// on connect can only be joined.
    pub async fn create_from_template(
        &self,
        owner: &str,
        template: &Template,
        cancel: &CancellationToken,
    ) -> Result<Instance, RouteError> {
        let kind = template.spec.default_kind;
        let name = instance_name(owner, template.name());
        if !kind.policy().auto_create_on_connect {
            // pre-provisioned instances are joined, never created here
            if self.api.get_opt(&name).await?.is_some() {
                return self.attach(&name, cancel).await;
            }
            return Err(RouteError::RequiresProvisioning {
                template: template.name().to_string(),
                kind,
            });
        }

        let instance = Instance {
            metadata: ObjectMeta::named(&name)
                .with_label(OWNER_LABEL, owner)
                .with_label(TEMPLATE_LABEL, template.name())
                .with_label(APP_LABEL, "burrow"),
            spec: InstanceSpec {
                owner: owner.to_string(),
                template: Some(template.name().to_string()),
                kind,
                ..Default::default()
            },
            status: Default::default(),
        };

        match self.api.create(instance).await {
            Ok(_) => info!(instance = %name, "Created {} instance for {}", kind, owner),
            Err(e) if e.is_already_exists() => {
                debug!(instance = %name, "Instance already exists, attaching")
            }
            Err(e) => return Err(e.into()),
        }

        self.attach(&name, cancel).await
    }

    /// Wait until `name` is Ready, bounded by the provisioning timeout.
    /// Deleting, Terminating and Deleted instances are unavailable until
    /// they are gone.
    pub async fn attach(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance, RouteError> {
        let mut events = self.instances.subscribe();
        let deadline = Instant::now() + self.provisioning_timeout;

        loop {
            let current = match self.instances.get(name) {
                Some(instance) => Some(instance),
                // the cache may not have seen a create issued moments ago
                None => self.api.get_opt(name).await?,
            };
            let Some(instance) = current else {
                return Err(RouteError::InstanceUnavailable {
                    name: name.to_string(),
                    reason: "it no longer exists".to_string(),
                });
            };
            if let Some(ready) = check_attachable(instance)? {
                return Ok(ready);
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RouteError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(RouteError::ProvisioningTimeout {
                            name: name.to_string(),
                            waited: self.provisioning_timeout,
                        });
                    }
                    event = events.recv() => match event {
                        Ok(event) if event.object().name() == name => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => {
                            return Err(RouteError::InstanceUnavailable {
                                name: name.to_string(),
                                reason: "gateway is shutting down".to_string(),
                            });
                        }
                    },
                }
            }
        }
    }

    /// Record session activity without waiting for the write
    pub fn touch(&self, name: &str) {
        let api = self.api.clone();
        let name = name.to_string();
        let now = current_time_millis();
        tokio::spawn(async move {
            let result = api
                .patch_status(&name, |instance| {
                    if instance.status.last_active.is_some_and(|t| t >= now) {
                        return false;
                    }
                    instance.status.last_active = Some(now);
                    true
                })
                .await;
            if let Err(e) = result {
                debug!(instance = %name, "Activity touch failed: {}", e);
            }
        });
    }
}

/// `Some` when the instance can take a session now, `None` to keep waiting
fn check_attachable(instance: Instance) -> Result<Option<Instance>, RouteError> {
    let name = instance.name().to_string();
    if instance.metadata.is_deleting() {
        return Err(RouteError::InstanceUnavailable {
            name,
            reason: "it is being deleted".to_string(),
        });
    }

    match instance.phase() {
        Phase::Ready => Ok(Some(instance)),
        Phase::Pending | Phase::Provisioning => Ok(None),
        Phase::Failed => {
            let failure = instance.status.failure.clone();
            match failure {
                Some(f) if f.category == FailureCategory::Capacity => {
                    Err(RouteError::CapacityExhausted {
                        name,
                        reason: f.message,
                    })
                }
                Some(f) => Err(RouteError::InstanceUnavailable {
                    name,
                    reason: f.message,
                }),
                None => Err(RouteError::InstanceUnavailable {
                    name,
                    reason: "provisioning failed".to_string(),
                }),
            }
        }
        Phase::Terminating | Phase::Deleted => Err(RouteError::InstanceUnavailable {
            name,
            reason: "it is being deleted".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{FailureReason, SessionKind};

    fn instance(phase: Phase) -> Instance {
        let mut inst = Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                kind: SessionKind::Ephemeral,
                ..Default::default()
            },
        );
        inst.status.phase = phase;
        inst
    }

    #[test]
    fn test_attachable_by_phase() {
        assert!(check_attachable(instance(Phase::Ready)).unwrap().is_some());
        assert!(check_attachable(instance(Phase::Provisioning))
            .unwrap()
            .is_none());
        assert!(matches!(
            check_attachable(instance(Phase::Terminating)),
            Err(RouteError::InstanceUnavailable { .. })
        ));

        let mut deleting = instance(Phase::Ready);
        deleting.metadata.deletion_timestamp = Some(1);
        assert!(matches!(
            check_attachable(deleting),
            Err(RouteError::InstanceUnavailable { .. })
        ));
    }

    #[test]
    fn test_capacity_failure_is_distinguished() {
        let mut failed = instance(Phase::Failed);
        failed.status.failure = Some(FailureReason::new(
            FailureCategory::Capacity,
            "node is at capacity",
        ));
        assert!(matches!(
            check_attachable(failed),
            Err(RouteError::CapacityExhausted { reason, .. }) if reason == "node is at capacity"
        ));

        let mut failed = instance(Phase::Failed);
        failed.status.failure = Some(FailureReason::new(
            FailureCategory::InvalidSpec,
            "image must be set",
        ));
        assert!(matches!(
            check_attachable(failed),
            Err(RouteError::InstanceUnavailable { .. })
        ));
    }
}
