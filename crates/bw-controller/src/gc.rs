//! Idle session collection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use bw_core::time::millis_between;
use bw_core::traits::ResourceStore;
use bw_core::{Instance, Phase, Template};
use bw_store::Api;

use crate::desired::idle_timeout;

/// Deletes Ready or Failed instances of collectable kinds that have been
/// idle too long
pub struct IdleCollector {
    instances: Api<Instance>,
    templates: Api<Template>,
    default_timeout: Duration,
}

impl IdleCollector {
    pub fn new(store: Arc<dyn ResourceStore>, default_timeout: Duration) -> Self {
        Self {
            instances: Api::new(store.clone()),
            templates: Api::new(store),
            default_timeout,
        }
    }

    /// Whether `instance` has outlived its idle timeout at `now` (Unix millis).
    /// A Failed instance is idle from the later of its last activity and
    /// the failure.
    pub fn is_expired(&self, instance: &Instance, template: Option<&Template>, now: u64) -> bool {
        if instance.metadata.is_deleting() || !instance.spec.kind.policy().idle_gc_eligible {
            return false;
        }
        let since = match instance.phase() {
            Phase::Ready => instance.last_active_or_created(),
            Phase::Failed => instance
                .last_active_or_created()
                .max(instance.status.last_transition),
            _ => return false,
        };
        let idle = Duration::from_millis(millis_between(since, now));
        idle > idle_timeout(instance, template, self.default_timeout)
    }

    /// One sweep at `now`; returns the instances marked for deletion.
    ///
    /// Each delete is conditioned on the version the sweep read, so an
    /// instance touched in the meantime survives until the next sweep.
    pub async fn sweep(&self, now: u64) -> Vec<String> {
        let (instances, templates) = match tokio::try_join!(
            self.instances.list(None),
            self.templates.list(None)
        ) {
            Ok(lists) => lists,
            Err(e) => {
                warn!("Idle sweep skipped: {}", e);
                return Vec::new();
            }
        };
        let templates: HashMap<&str, &Template> =
            templates.iter().map(|t| (t.name(), t)).collect();

        let mut collected = Vec::new();
        for instance in &instances {
            let template = instance
                .spec
                .template
                .as_deref()
                .and_then(|t| templates.get(t).copied());
            if !self.is_expired(instance, template, now) {
                continue;
            }

            let name = instance.name();
            match self
                .instances
                .delete_at_version(name, instance.metadata.resource_version)
                .await
            {
                Ok(_) => {
                    info!(
                        "Collecting idle instance {} (last active {}s ago)",
                        name,
                        millis_between(instance.last_active_or_created(), now) / 1000
                    );
                    collected.push(name.to_string());
                }
                Err(e) if e.is_conflict() => {
                    debug!("Instance {} changed during the sweep, keeping it", name)
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Failed to collect instance {}: {}", name, e),
            }
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{InstanceSpec, SessionKind, TemplateSpec};
    use bw_store::MemoryStore;

    async fn ready_instance(api: &Api<Instance>, name: &str, kind: SessionKind) {
        let spec = InstanceSpec {
            owner: "alice".into(),
            template: Some("web".into()),
            kind,
            ..Default::default()
        };
        api.create(Instance::new(name, spec)).await.unwrap();
        api.patch_status(name, |i| {
            i.status.phase = Phase::Ready;
            i.status.last_active = Some(1_000);
            true
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_respects_kind_and_timeout() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let templates: Api<Template> = Api::new(store.clone());
        templates
            .create(Template::new(
                "web",
                TemplateSpec {
                    image: "alpine".into(),
                    idle_timeout_secs: Some(60),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let instances: Api<Instance> = Api::new(store.clone());
        ready_instance(&instances, "alice-eph", SessionKind::Ephemeral).await;
        ready_instance(&instances, "alice-pers", SessionKind::Persistent).await;

        let gc = IdleCollector::new(store.clone(), Duration::from_secs(3600));
        assert!(gc.sweep(1_000 + 30_000).await.is_empty());

        let collected = gc.sweep(1_000 + 61_000).await;
        assert_eq!(collected, vec!["alice-eph".to_string()]);
        assert!(instances.get_opt("alice-eph").await.unwrap().is_none());
        assert!(instances.get_opt("alice-pers").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_instances_are_collected_by_kind() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let instances: Api<Instance> = Api::new(store.clone());
        for (name, kind) in [
            ("alice-eph", SessionKind::Ephemeral),
            ("alice-pre", SessionKind::Preemptible),
            ("alice-pers", SessionKind::Persistent),
        ] {
            ready_instance(&instances, name, kind).await;
            instances
                .patch_status(name, |i| {
                    i.status.phase = Phase::Failed;
                    i.status.last_transition = 5_000;
                    true
                })
                .await
                .unwrap();
        }

        let gc = IdleCollector::new(store.clone(), Duration::from_secs(60));
        // idle since the failure, not since the last activity
        assert!(gc.sweep(5_000 + 30_000).await.is_empty());

        let mut collected = gc.sweep(5_000 + 61_000).await;
        collected.sort();
        assert_eq!(collected, vec!["alice-eph".to_string(), "alice-pre".to_string()]);
        assert!(instances.get_opt("alice-pers").await.unwrap().is_some());
    }

    #[test]
    fn test_touch_resets_idle_clock() {
        let gc = IdleCollector::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let mut inst = Instance::new(
            "alice-eph",
            InstanceSpec {
                owner: "alice".into(),
                ..Default::default()
            },
        );
        inst.status.phase = Phase::Ready;
        inst.metadata.creation_timestamp = 0;
        assert!(gc.is_expired(&inst, None, 120_000));

        inst.status.last_active = Some(100_000);
        assert!(!gc.is_expired(&inst, None, 120_000));

        inst.status.phase = Phase::Provisioning;
        assert!(!gc.is_expired(&inst, None, 500_000));
    }
}
