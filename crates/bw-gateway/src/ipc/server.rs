//! IPC server implementation
//!
//! Listens on localhost TCP for newline-delimited JSON requests from the
//! CLI. A `watch` request turns the connection into an event stream that
//! runs until the client disconnects.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use bw_core::ipc::{GatewayStatus, InstanceInfo, IpcEvent, IpcRequest, IpcResponse, TemplateInfo};
use bw_core::naming::instance_name;
use bw_core::traits::WatchEvent;
use bw_core::{
    Instance, InstanceSpec, Kind, ObjectMeta, Object, SessionKind, StoreError, Template,
    APP_LABEL, OWNER_LABEL, TEMPLATE_LABEL,
};
use bw_store::Api;

use crate::state::GatewayState;

type EventStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// IPC server for CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    address: String,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl IpcServer {
    pub fn new(address: String, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            address,
            state,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("IPC server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    return Ok(());
                }
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                        continue;
                    }
                },
            };

            if !peer_addr.ip().is_loopback() {
                tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                continue;
            }

            let state = Arc::clone(&self.state);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, state, cancel).await {
                    tracing::warn!("IPC client error: {}", e);
                }
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut events: Option<EventStream> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                    Ok(IpcRequest::Watch { kinds }) => match open_watch(&state, &kinds).await {
                        Ok(stream) => {
                            events = Some(stream);
                            IpcResponse::Subscribed
                        }
                        Err(message) => IpcResponse::Error { message },
                    },
                    Ok(request) => handle_request(request, &state).await,
                    Err(e) => IpcResponse::Error {
                        message: format!("Invalid request: {}", e),
                    },
                };
                write_line(&mut writer, &response).await?;
            }

            event = next_event(&mut events) => match event {
                Some(Ok(event)) => write_line(&mut writer, &to_ipc_event(event)).await?,
                Some(Err(e)) => {
                    let message = format!("Watch ended: {}", e);
                    write_line(&mut writer, &IpcResponse::Error { message }).await?;
                    events = None;
                }
                None => events = None,
            },
        }
    }

    Ok(())
}

async fn next_event(events: &mut Option<EventStream>) -> Option<Result<WatchEvent, StoreError>> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

/// Merged watch over the requested kinds, starting from now
async fn open_watch(state: &GatewayState, kinds: &[Kind]) -> Result<EventStream, String> {
    let kinds: Vec<Kind> = if kinds.is_empty() {
        vec![Kind::Template, Kind::Instance]
    } else {
        kinds.to_vec()
    };

    let mut streams = Vec::with_capacity(kinds.len());
    for kind in kinds {
        if !matches!(kind, Kind::Template | Kind::Instance) {
            return Err(format!("{} cannot be watched over IPC", kind));
        }
        let list = state
            .store
            .list(kind, None)
            .await
            .map_err(|e| e.to_string())?;
        let stream = state
            .store
            .watch(kind, list.resource_version)
            .await
            .map_err(|e| e.to_string())?;
        streams.push(stream);
    }
    Ok(stream::select_all(streams).boxed())
}

fn to_ipc_event(event: WatchEvent) -> IpcEvent {
    let phase = match &event.object {
        Object::Instance(instance) => Some(instance.phase()),
        _ => None,
    };
    IpcEvent::Changed {
        event_type: event.event_type,
        kind: event.object.kind(),
        name: event.object.name().to_string(),
        phase,
        resource_version: event.resource_version,
    }
}

fn error(e: impl std::fmt::Display) -> IpcResponse {
    IpcResponse::Error {
        message: e.to_string(),
    }
}

async fn handle_request(request: IpcRequest, state: &GatewayState) -> IpcResponse {
    let templates: Api<Template> = Api::new(state.store.clone());
    let instances: Api<Instance> = Api::new(state.store.clone());

    match request {
        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::GetStatus => IpcResponse::Status(GatewayStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            bind_address: state.config.bind_address.clone(),
            connection_count: state.connection_count(),
            session_count: state.session_count(),
            template_count: state.router.templates().len(),
            instance_count: state.router.instances().len(),
        }),

        IpcRequest::ListTemplates => match templates.list(None).await {
            Ok(list) => IpcResponse::Templates {
                templates: list.iter().map(TemplateInfo::from).collect(),
            },
            Err(e) => error(e),
        },

        IpcRequest::GetTemplate { name } => match templates.get(&name).await {
            Ok(template) => IpcResponse::Template { template },
            Err(e) => error(e),
        },

        IpcRequest::ApplyTemplate { name, spec } => {
            let result = match templates.create(Template::new(&name, spec.clone())).await {
                Err(e) if e.is_already_exists() => {
                    templates
                        .patch(&name, |t| {
                            if t.spec == spec {
                                return false;
                            }
                            t.spec = spec.clone();
                            true
                        })
                        .await
                }
                other => other,
            };
            match result {
                Ok(template) => {
                    tracing::info!("Applied template {}", name);
                    IpcResponse::Template { template }
                }
                Err(e) => error(e),
            }
        }

        IpcRequest::DeleteTemplate { name } => match templates.delete(&name).await {
            Ok(_) => {
                tracing::info!("Deleted template {}", name);
                IpcResponse::Ok
            }
            Err(e) => error(e),
        },

        IpcRequest::ListInstances { owner } => match instances.list(None).await {
            Ok(list) => IpcResponse::Instances {
                instances: list
                    .iter()
                    .filter(|i| owner.as_deref().map_or(true, |o| i.owner() == o))
                    .map(InstanceInfo::from)
                    .collect(),
            },
            Err(e) => error(e),
        },

        IpcRequest::GetInstance { name } => match instances.get(&name).await {
            Ok(instance) => IpcResponse::Instance { instance },
            Err(e) => error(e),
        },

        IpcRequest::CreateInstance {
            owner,
            name,
            template,
            kind,
            overrides,
        } => {
            let name = match (name, &template) {
                (Some(name), _) => name,
                (None, Some(template)) => instance_name(&owner, template),
                (None, None) => {
                    return error("an instance needs a name or a template");
                }
            };
            let kind = match (kind, &template) {
                (Some(kind), _) => kind,
                (None, Some(t)) => match templates.get(t).await {
                    Ok(t) => t.spec.default_kind,
                    Err(e) => return error(e),
                },
                (None, None) => SessionKind::default(),
            };

            let mut metadata = ObjectMeta::named(&name)
                .with_label(OWNER_LABEL, owner.as_str())
                .with_label(APP_LABEL, "burrow");
            if let Some(t) = &template {
                metadata = metadata.with_label(TEMPLATE_LABEL, t.as_str());
            }
            let instance = Instance {
                metadata,
                spec: InstanceSpec {
                    owner,
                    template,
                    kind,
                    overrides,
                },
                status: Default::default(),
            };

            match instances.create(instance).await {
                Ok(instance) => {
                    tracing::info!("Created {} instance {}", kind, name);
                    IpcResponse::Instance { instance }
                }
                Err(e) => error(e),
            }
        }

        IpcRequest::DeleteInstance { name } => match instances.delete(&name).await {
            Ok(_) => {
                tracing::info!("Instance {} marked for deletion", name);
                IpcResponse::Ok
            }
            Err(e) => error(e),
        },

        IpcRequest::Watch { .. } => error("watch is handled per connection"),
    }
}
