//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bw_controller::Controller;
use bw_core::config::{BackoffConfig, ControllerConfig, GatewayConfig, NodeConfig};
use bw_core::traits::ResourceStore;
use bw_core::{SessionKind, Template, TemplateSpec, VolumeSpec};
use bw_gateway::auth::UserKeys;
use bw_gateway::bridge::ClientChannel;
use bw_gateway::{BridgeError, GatewayState};
use bw_node::NodeRuntime;
use bw_store::{Api, MemoryStore};

/// What a bridge or session wrote to the client, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Data(Vec<u8>),
    ExitStatus(u32),
    Eof,
    Close,
}

#[derive(Clone, Default)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<Sent>>>,
    /// Data writes fail as if the client had gone away
    refusing: Arc<AtomicBool>,
}

impl RecordingChannel {
    /// A channel whose client has already closed it
    pub fn refusing() -> Self {
        let channel = Self::default();
        channel.refusing.store(true, Ordering::SeqCst);
        channel
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// All data bytes, concatenated
    pub fn output(&self) -> Vec<u8> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Data(d) => Some(d),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    /// Everything after the last data write
    pub fn trailer(&self) -> Vec<Sent> {
        let sent = self.sent();
        let last_data = sent
            .iter()
            .rposition(|s| matches!(s, Sent::Data(_)))
            .map_or(0, |i| i + 1);
        sent[last_data..].to_vec()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }
}

#[async_trait]
impl ClientChannel for RecordingChannel {
    async fn data(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed);
        }
        self.push(Sent::Data(bytes.to_vec()));
        Ok(())
    }

    async fn exit_status(&self, code: u32) {
        self.push(Sent::ExitStatus(code));
    }

    async fn eof(&self) {
        self.push(Sent::Eof);
    }

    async fn close(&self) {
        self.push(Sent::Close);
    }
}

/// Store, node, controller and gateway state in one process
pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub state: Arc<GatewayState>,
    pub cancel: CancellationToken,
    _data: tempfile::TempDir,
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        provisioning_timeout: Duration::from_secs(10),
        linger_ms: Duration::from_millis(100),
        ..Default::default()
    }
}

impl Cluster {
    /// Everything running against an empty store
    pub async fn start(gateway: GatewayConfig) -> Self {
        Self::build(gateway, true).await
    }

    /// Gateway state and caches only; nothing drives instances to Ready
    pub async fn without_controller(gateway: GatewayConfig) -> Self {
        Self::build(gateway, false).await
    }

    async fn build(gateway: GatewayConfig, with_controller: bool) -> Self {
        let data = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn ResourceStore> = store.clone();
        let cancel = CancellationToken::new();

        let node = NodeRuntime::new(
            NodeConfig {
                name: "it-node".into(),
                data_dir: data.path().to_path_buf(),
                shell: "/bin/sh".into(),
                max_pods: 8,
                startup_delay_ms: Duration::ZERO,
            },
            dyn_store.clone(),
        );

        let controller = Controller::new(
            ControllerConfig {
                workers: 2,
                retry_budget: 3,
                backoff: BackoffConfig {
                    initial_ms: Duration::from_millis(10),
                    max: Duration::from_millis(100),
                    multiplier: 2.0,
                    jitter: 0.0,
                },
                ..Default::default()
            },
            dyn_store.clone(),
        );

        let templates = controller.template_cache().clone();
        let instances = controller.instance_cache().clone();
        if with_controller {
            tokio::spawn(node.clone().run(cancel.clone()));
            tokio::spawn(controller.clone().run(cancel.clone()));
        } else {
            tokio::spawn(templates.clone().run(cancel.clone()));
            tokio::spawn(instances.clone().run(cancel.clone()));
        }
        templates.wait_synced().await;
        instances.wait_synced().await;

        let state = Arc::new(GatewayState::new(
            gateway,
            dyn_store,
            templates,
            instances,
            Arc::new(node.executor()),
            UserKeys::new(),
        ));

        Cluster {
            store,
            state,
            cancel,
            _data: data,
        }
    }

    pub fn store(&self) -> Arc<dyn ResourceStore> {
        self.store.clone()
    }

    /// Add a template and wait until the router can see it
    pub async fn template(&self, name: &str, kind: SessionKind) {
        let api: Api<Template> = Api::new(self.store());
        api.create(Template::new(
            name,
            TemplateSpec {
                image: "ubuntu:24.04".into(),
                default_kind: kind,
                volume: VolumeSpec::Claim {
                    size: "1Gi".into(),
                    storage_class: None,
                    mount_path: "/home/dev".into(),
                },
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        for _ in 0..200 {
            if self.state.router.templates().get(name).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("template {} never reached the cache", name);
    }
}
