//! Desired pod and claim for an instance
//!
//! Everything here is a pure function of the instance, its template and
//! the controller limits, so every reconcile can recompute it from scratch.

use std::collections::BTreeMap;
use std::time::Duration;

use bw_core::config::ControllerConfig;
use bw_core::model::quantity::{parse_bytes, parse_cpu_millis};
use bw_core::model::{ClaimSpec, PodSpec, VolumeMount};
use bw_core::naming::{claim_name, pod_name};
use bw_core::{
    Instance, Kind, ObjectMeta, OwnerReference, PersistentVolumeClaim, Pod, ResourceLimits,
    Template, VolumeSpec, APP_LABEL, INSTANCE_LABEL, OWNER_LABEL, TEMPLATE_LABEL,
};

/// Priority class given to pods of evictable kinds
pub const LOW_PRIORITY_CLASS: &str = "burrow-preemptible";

/// Effective settings of an instance once overrides are applied
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub volume: VolumeSpec,
    pub node_selector: BTreeMap<String, String>,
}

/// Merge template and overrides, then check the result against the
/// controller limits. Errors describe an invalid spec.
pub fn effective_spec(
    instance: &Instance,
    template: Option<&Template>,
    config: &ControllerConfig,
) -> Result<EffectiveSpec, String> {
    let base = match (&instance.spec.template, template) {
        (Some(name), None) => return Err(format!("template '{}' does not exist", name)),
        (Some(_), Some(t)) if !t.visible_to(instance.owner()) => {
            return Err(format!(
                "template '{}' is not available to {}",
                t.name(),
                instance.owner()
            ))
        }
        (Some(_), Some(t)) => Some(&t.spec),
        (None, _) => None,
    };

    let overrides = &instance.spec.overrides;
    let spec = EffectiveSpec {
        image: overrides
            .image
            .clone()
            .or_else(|| base.map(|b| b.image.clone()))
            .unwrap_or_default(),
        command: overrides
            .command
            .clone()
            .or_else(|| base.map(|b| b.command.clone()))
            .unwrap_or_default(),
        env: base.map(|b| b.env.clone()).unwrap_or_default(),
        resources: overrides
            .resources
            .clone()
            .or_else(|| base.map(|b| b.resources.clone()))
            .unwrap_or_default(),
        volume: overrides
            .volume
            .clone()
            .or_else(|| base.map(|b| b.volume.clone()))
            .unwrap_or_default(),
        node_selector: base.map(|b| b.node_selector.clone()).unwrap_or_default(),
    };

    if spec.image.trim().is_empty() {
        return Err("no image configured".to_string());
    }
    if let Some(cpu) = &spec.resources.cpu {
        let millis = parse_cpu_millis(cpu)?;
        if millis > config.max_cpu_millis {
            return Err(format!(
                "cpu {} exceeds the limit of {}m",
                cpu, config.max_cpu_millis
            ));
        }
    }
    if let Some(memory) = &spec.resources.memory {
        let bytes = parse_bytes(memory)?;
        if bytes > config.max_memory_bytes {
            return Err(format!(
                "memory {} exceeds the limit of {} bytes",
                memory, config.max_memory_bytes
            ));
        }
    }
    if let VolumeSpec::Claim { size, .. } = &spec.volume {
        parse_bytes(size).map_err(|e| format!("volume size: {}", e))?;
    }
    Ok(spec)
}

fn labels(instance: &Instance) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), instance.name().to_string());
    labels.insert(OWNER_LABEL.to_string(), instance.owner().to_string());
    labels.insert(APP_LABEL.to_string(), "burrow".to_string());
    if let Some(template) = &instance.spec.template {
        labels.insert(TEMPLATE_LABEL.to_string(), template.clone());
    }
    labels
}

fn owner_reference(instance: &Instance) -> OwnerReference {
    OwnerReference {
        kind: Kind::Instance,
        name: instance.name().to_string(),
        uid: instance.metadata.uid.clone(),
        controller: true,
    }
}

/// The claim an instance needs, if its volume spec asks for one.
///
/// Claims of kinds whose volume outlives the instance carry labels only,
/// so removing the instance never cascades to them.
pub fn desired_claim(instance: &Instance, spec: &EffectiveSpec) -> Option<PersistentVolumeClaim> {
    let VolumeSpec::Claim {
        size,
        storage_class,
        ..
    } = &spec.volume
    else {
        return None;
    };

    let mut metadata = ObjectMeta::named(claim_name(instance.name()));
    metadata.labels = labels(instance);
    if !instance.spec.kind.policy().volume_retained_on_delete {
        metadata.owner_references.push(owner_reference(instance));
    }

    Some(PersistentVolumeClaim {
        metadata,
        spec: ClaimSpec {
            size: size.clone(),
            storage_class: storage_class.clone(),
        },
        status: Default::default(),
    })
}

/// The pod backing an instance
pub fn desired_pod(instance: &Instance, spec: &EffectiveSpec) -> Pod {
    let mut metadata = ObjectMeta::named(pod_name(instance.name()));
    metadata.labels = labels(instance);
    metadata.owner_references.push(owner_reference(instance));

    let volume = match &spec.volume {
        VolumeSpec::None => None,
        VolumeSpec::Claim { mount_path, .. } => Some(VolumeMount {
            claim_name: claim_name(instance.name()),
            mount_path: mount_path.clone(),
        }),
    };

    let mut env = spec.env.clone();
    env.insert("BURROW_INSTANCE".to_string(), instance.name().to_string());
    env.insert("BURROW_OWNER".to_string(), instance.owner().to_string());

    Pod {
        metadata,
        spec: PodSpec {
            image: spec.image.clone(),
            command: spec.command.clone(),
            env,
            resources: spec.resources.clone(),
            volume,
            node_selector: spec.node_selector.clone(),
            priority_class: instance
                .spec
                .kind
                .policy()
                .evictable
                .then(|| LOW_PRIORITY_CLASS.to_string()),
        },
        status: Default::default(),
    }
}

/// Idle period after which the sweep collects an instance: the instance
/// override, else the template's, else `default`
pub fn idle_timeout(instance: &Instance, template: Option<&Template>, default: Duration) -> Duration {
    instance
        .spec
        .overrides
        .idle_timeout_secs
        .or_else(|| template.and_then(|t| t.spec.idle_timeout_secs))
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{InstanceSpec, SessionKind, TemplateSpec};

    fn template() -> Template {
        Template::new(
            "web",
            TemplateSpec {
                image: "ubuntu:24.04".into(),
                resources: ResourceLimits {
                    cpu: Some("500m".into()),
                    memory: Some("512Mi".into()),
                },
                volume: VolumeSpec::Claim {
                    size: "1Gi".into(),
                    storage_class: None,
                    mount_path: "/home/dev".into(),
                },
                idle_timeout_secs: Some(600),
                ..Default::default()
            },
        )
    }

    fn instance(kind: SessionKind) -> Instance {
        let mut inst = Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                kind,
                ..Default::default()
            },
        );
        inst.metadata.uid = "uid-1".into();
        inst
    }

    #[test]
    fn test_overrides_win_over_template() {
        let mut inst = instance(SessionKind::Ephemeral);
        inst.spec.overrides.image = Some("debian:12".into());
        let spec = effective_spec(&inst, Some(&template()), &ControllerConfig::default()).unwrap();
        assert_eq!(spec.image, "debian:12");
        assert_eq!(spec.resources.cpu.as_deref(), Some("500m"));
    }

    #[test]
    fn test_invalid_specs() {
        let config = ControllerConfig::default();
        let inst = instance(SessionKind::Ephemeral);
        assert!(effective_spec(&inst, None, &config)
            .unwrap_err()
            .contains("does not exist"));

        let mut greedy = instance(SessionKind::Ephemeral);
        greedy.spec.overrides.resources = Some(ResourceLimits {
            cpu: Some("64".into()),
            memory: None,
        });
        assert!(effective_spec(&greedy, Some(&template()), &config).is_err());

        let mut garbled = instance(SessionKind::Ephemeral);
        garbled.spec.overrides.resources = Some(ResourceLimits {
            cpu: None,
            memory: Some("lots".into()),
        });
        assert!(effective_spec(&garbled, Some(&template()), &config).is_err());

        let mut private = template();
        private.spec.owner = Some("bob".into());
        assert!(effective_spec(&inst, Some(&private), &config).is_err());
    }

    #[test]
    fn test_persistent_claim_has_no_owner_reference() {
        let config = ControllerConfig::default();
        let ephemeral = instance(SessionKind::Ephemeral);
        let spec = effective_spec(&ephemeral, Some(&template()), &config).unwrap();
        let claim = desired_claim(&ephemeral, &spec).unwrap();
        assert_eq!(claim.name(), "alice-web-home");
        assert!(claim.metadata.is_owned_by("uid-1"));

        let persistent = instance(SessionKind::Persistent);
        let claim = desired_claim(&persistent, &spec).unwrap();
        assert!(claim.metadata.owner_references.is_empty());
        assert_eq!(claim.metadata.label(INSTANCE_LABEL), Some("alice-web"));
    }

    #[test]
    fn test_pod_mounts_claim() {
        let inst = instance(SessionKind::Preemptible);
        let spec = effective_spec(&inst, Some(&template()), &ControllerConfig::default()).unwrap();
        let pod = desired_pod(&inst, &spec);

        assert_eq!(pod.name(), "alice-web-pod");
        assert!(pod.metadata.is_owned_by("uid-1"));
        assert_eq!(
            pod.spec.volume.as_ref().map(|v| v.claim_name.as_str()),
            Some("alice-web-home")
        );
        assert_eq!(pod.spec.priority_class.as_deref(), Some(LOW_PRIORITY_CLASS));
        assert_eq!(pod.spec.env.get("BURROW_OWNER").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_idle_timeout_precedence() {
        let default = Duration::from_secs(3600);
        let mut inst = instance(SessionKind::Ephemeral);
        assert_eq!(idle_timeout(&inst, None, default), default);
        assert_eq!(
            idle_timeout(&inst, Some(&template()), default),
            Duration::from_secs(600)
        );
        inst.spec.overrides.idle_timeout_secs = Some(30);
        assert_eq!(
            idle_timeout(&inst, Some(&template()), default),
            Duration::from_secs(30)
        );
    }
}
