//! IPC client for communicating with the gateway
//!
//! Uses TCP on localhost. One request line, one response line; after a
//! successful `watch` the connection carries event lines only.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use bw_core::ipc::{GatewayStatus, InstanceInfo, IpcEvent, IpcRequest, IpcResponse, TemplateInfo};
use bw_core::{Instance, InstanceOverrides, Kind, SessionKind, Template, TemplateSpec};

/// Client for the gateway's admin port
pub struct GatewayClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

/// What `create_instance` asks for
#[derive(Debug, Clone, Default)]
pub struct CreateInstance {
    pub owner: String,
    pub name: Option<String>,
    pub template: Option<String>,
    pub kind: Option<SessionKind>,
    pub overrides: InstanceOverrides,
}

macro_rules! expect_response {
    ($response:expr, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            IpcResponse::Error { message } => Err(anyhow::anyhow!("{}", message)),
            other => Err(anyhow::anyhow!("Unexpected response: {:?}", other)),
        }
    };
}

impl GatewayClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&mut self) -> Result<&mut BufReader<TcpStream>> {
        if self.stream.is_none() {
            tracing::debug!("Connecting to gateway at {}", self.address);
            let stream = TcpStream::connect(&self.address).await.with_context(|| {
                format!(
                    "Failed to connect to gateway at {}. Is `burrow serve` running?",
                    self.address
                )
            })?;
            self.stream = Some(BufReader::new(stream));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))
    }

    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        let stream = self.connect().await?;

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        let line = read_line(stream).await?;
        let response: IpcResponse = serde_json::from_str(&line)
            .with_context(|| format!("Malformed response from gateway: {}", line.trim()))?;
        Ok(response)
    }

    /// Check if the gateway answers
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&mut self) -> Result<GatewayStatus> {
        let response = self.send_request(IpcRequest::GetStatus).await?;
        expect_response!(response, IpcResponse::Status(status) => status)
    }

    pub async fn list_templates(&mut self) -> Result<Vec<TemplateInfo>> {
        let response = self.send_request(IpcRequest::ListTemplates).await?;
        expect_response!(response, IpcResponse::Templates { templates } => templates)
    }

    pub async fn get_template(&mut self, name: &str) -> Result<Template> {
        let request = IpcRequest::GetTemplate {
            name: name.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Template { template } => template)
    }

    /// Create or replace a template
    pub async fn apply_template(&mut self, name: &str, spec: TemplateSpec) -> Result<Template> {
        let request = IpcRequest::ApplyTemplate {
            name: name.to_string(),
            spec,
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Template { template } => template)
    }

    pub async fn delete_template(&mut self, name: &str) -> Result<()> {
        let request = IpcRequest::DeleteTemplate {
            name: name.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Ok => ())
    }

    pub async fn list_instances(&mut self, owner: Option<&str>) -> Result<Vec<InstanceInfo>> {
        let request = IpcRequest::ListInstances {
            owner: owner.map(String::from),
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Instances { instances } => instances)
    }

    pub async fn get_instance(&mut self, name: &str) -> Result<Instance> {
        let request = IpcRequest::GetInstance {
            name: name.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Instance { instance } => instance)
    }

    pub async fn create_instance(&mut self, create: CreateInstance) -> Result<Instance> {
        let request = IpcRequest::CreateInstance {
            owner: create.owner,
            name: create.name,
            template: create.template,
            kind: create.kind,
            overrides: create.overrides,
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Instance { instance } => instance)
    }

    /// Mark an instance for deletion
    pub async fn delete_instance(&mut self, name: &str) -> Result<()> {
        let request = IpcRequest::DeleteInstance {
            name: name.to_string(),
        };
        let response = self.send_request(request).await?;
        expect_response!(response, IpcResponse::Ok => ())
    }

    /// Subscribe to changes; follow with [`next_event`](Self::next_event)
    pub async fn watch(&mut self, kinds: Vec<Kind>) -> Result<()> {
        let response = self.send_request(IpcRequest::Watch { kinds }).await?;
        expect_response!(response, IpcResponse::Subscribed => ())
    }

    /// Next change after [`watch`](Self::watch); `None` when the gateway
    /// closes the connection
    pub async fn next_event(&mut self) -> Result<Option<IpcEvent>> {
        let stream = self.connect().await?;
        let line = match read_line(stream).await {
            Ok(line) => line,
            Err(e) if e.downcast_ref::<ConnectionClosed>().is_some() => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Ok(event) = serde_json::from_str::<IpcEvent>(&line) {
            return Ok(Some(event));
        }
        match serde_json::from_str::<IpcResponse>(&line) {
            Ok(IpcResponse::Error { message }) => anyhow::bail!("{}", message),
            _ => anyhow::bail!("Malformed event from gateway: {}", line.trim()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Gateway closed the connection")]
struct ConnectionClosed;

async fn read_line(stream: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Err(ConnectionClosed.into());
    }
    Ok(line)
}
