//! IPC protocol for CLI to gateway communication
//!
//! Newline-delimited JSON over TCP on localhost (127.0.0.1). This is the
//! admin interface: it reads and writes templates, lists instances, and
//! requests instance creation or deletion. It never touches pods or claims;
//! the controller owns those.

use serde::{Deserialize, Serialize};

use crate::model::{Instance, InstanceOverrides, Phase, SessionKind, Template, TemplateSpec};
use crate::traits::EventType;
use crate::types::Kind;

/// IPC request from the CLI to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Ping (for keepalive)
    Ping,

    GetStatus,

    ListTemplates,

    GetTemplate { name: String },

    /// Create the template or replace its spec
    ApplyTemplate { name: String, spec: TemplateSpec },

    DeleteTemplate { name: String },

    /// List instances, optionally for one owner
    ListInstances { owner: Option<String> },

    GetInstance { name: String },

    /// Pre-provision an instance, typically a persistent one
    CreateInstance {
        owner: String,
        /// Instance name; derived from owner and template when absent
        name: Option<String>,
        template: Option<String>,
        kind: Option<SessionKind>,
        #[serde(default)]
        overrides: InstanceOverrides,
    },

    /// Mark an instance for deletion; the controller tears it down
    DeleteInstance { name: String },

    /// Stream change events for the given kinds until the client disconnects
    Watch { kinds: Vec<Kind> },
}

/// IPC response from the gateway to the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Pong,

    Status(GatewayStatus),

    Templates { templates: Vec<TemplateInfo> },

    Template { template: Template },

    Instances { instances: Vec<InstanceInfo> },

    Instance { instance: Instance },

    /// Watch accepted; event lines follow
    Subscribed,

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },
}

/// Change notification pushed to watching clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    Changed {
        event_type: EventType,
        kind: Kind,
        name: String,
        /// Instance phase, for instance events
        phase: Option<Phase>,
        resource_version: u64,
    },
}

/// Gateway status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub bind_address: String,
    /// Open SSH connections
    pub connection_count: usize,
    /// Bridged sessions currently streaming
    pub session_count: usize,
    pub template_count: usize,
    pub instance_count: usize,
}

/// Template summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub name: String,
    pub image: String,
    pub kind: SessionKind,
    pub description: String,
    /// `None` for system templates
    pub owner: Option<String>,
    pub idle_timeout_secs: Option<u64>,
}

impl From<&Template> for TemplateInfo {
    fn from(t: &Template) -> Self {
        Self {
            name: t.name().to_string(),
            image: t.spec.image.clone(),
            kind: t.spec.default_kind,
            description: t.spec.description.clone(),
            owner: t.spec.owner.clone(),
            idle_timeout_secs: t.spec.idle_timeout_secs,
        }
    }
}

/// Instance summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub name: String,
    pub owner: String,
    pub template: Option<String>,
    pub kind: SessionKind,
    pub phase: Phase,
    pub pod: Option<String>,
    pub volume: Option<String>,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis
    pub last_active: Option<u64>,
    /// Failure reason or progress note
    pub message: Option<String>,
    pub deleting: bool,
}

impl From<&Instance> for InstanceInfo {
    fn from(i: &Instance) -> Self {
        let message = i
            .status
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .or_else(|| i.status.message.clone());
        Self {
            name: i.name().to_string(),
            owner: i.spec.owner.clone(),
            template: i.spec.template.clone(),
            kind: i.spec.kind,
            phase: i.status.phase,
            pod: i.status.pod_ref.clone(),
            volume: i.status.volume_ref.clone(),
            created_at: i.metadata.creation_timestamp,
            last_active: i.status.last_active,
            message,
            deleting: i.metadata.is_deleting(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceSpec;

    #[test]
    fn test_request_serialization() {
        let req = IpcRequest::DeleteInstance {
            name: "alice-web".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("delete_instance"));

        let decoded: IpcRequest = serde_json::from_str(&json).unwrap();
        match decoded {
            IpcRequest::DeleteInstance { name } => assert_eq!(name, "alice-web"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_create_instance_overrides_default() {
        let json = r#"{"type":"create_instance","owner":"alice","name":"42","template":null,"kind":"persistent"}"#;
        let decoded: IpcRequest = serde_json::from_str(json).unwrap();
        match decoded {
            IpcRequest::CreateInstance {
                owner,
                kind,
                overrides,
                ..
            } => {
                assert_eq!(owner, "alice");
                assert_eq!(kind, Some(SessionKind::Persistent));
                assert_eq!(overrides, InstanceOverrides::default());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_instance_info_prefers_failure_message() {
        let mut inst = Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                ..Default::default()
            },
        );
        inst.status.phase = Phase::Failed;
        inst.status.message = Some("provisioning".into());
        inst.status.failure = Some(crate::model::FailureReason::new(
            crate::model::FailureCategory::Capacity,
            "quota exhausted",
        ));

        let info = InstanceInfo::from(&inst);
        assert_eq!(info.phase, Phase::Failed);
        assert_eq!(info.message.as_deref(), Some("quota exhausted"));

        let resp = IpcResponse::Instances {
            instances: vec![info],
        };
        let json = serde_json::to_string(&resp).unwrap();
        let decoded: IpcResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, IpcResponse::Instances { instances } if instances.len() == 1));
    }
}
