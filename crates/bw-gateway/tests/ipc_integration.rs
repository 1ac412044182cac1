//! Integration tests for the admin IPC server
//!
//! Each test serves IPC on an ephemeral localhost port against an
//! in-memory store and talks to it over TCP like the CLI does.

mod common;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use bw_core::ipc::{IpcEvent, IpcRequest, IpcResponse};
use bw_core::traits::EventType;
use bw_core::{InstanceOverrides, Kind, SessionKind, TemplateSpec};
use bw_gateway::ipc::IpcServer;

use common::{gateway_config, Cluster};

/// Test client that speaks the newline-delimited JSON protocol
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        let mut last_err = None;
        for _ in 0..10 {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Self {
                        reader: BufReader::new(reader),
                        writer: BufWriter::new(writer),
                    };
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        panic!(
            "Failed to connect to IPC server at {}: {:?}",
            address, last_err
        );
    }

    async fn send_raw(&mut self, line: &str) -> IpcResponse {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
        let line = self.read_line().await;
        serde_json::from_str(&line).expect("Failed to parse response")
    }

    async fn send_request(&mut self, request: IpcRequest) -> IpcResponse {
        let json = serde_json::to_string(&request).expect("Failed to serialize request");
        self.send_raw(&json).await
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for the server")
            .expect("Failed to read response");
        if line.is_empty() {
            panic!("Server sent empty response (connection closed?)");
        }
        line
    }

    async fn next_event(&mut self) -> IpcEvent {
        let line = self.read_line().await;
        serde_json::from_str(&line).expect("Failed to parse event")
    }
}

/// Start an IPC server for `cluster`; returns its address
async fn serve(cluster: &Cluster) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = IpcServer::new(
        address.clone(),
        cluster.state.clone(),
        cluster.cancel.clone(),
    );
    tokio::spawn(async move { server.serve(listener).await });
    address
}

fn spec(image: &str, kind: SessionKind) -> TemplateSpec {
    TemplateSpec {
        image: image.into(),
        default_kind: kind,
        ..Default::default()
    }
}

fn apply(name: &str, image: &str, kind: SessionKind) -> IpcRequest {
    IpcRequest::ApplyTemplate {
        name: name.into(),
        spec: spec(image, kind),
    }
}

fn create(owner: &str, template: Option<&str>) -> IpcRequest {
    IpcRequest::CreateInstance {
        owner: owner.into(),
        name: None,
        template: template.map(String::from),
        kind: None,
        overrides: InstanceOverrides::default(),
    }
}

#[tokio::test]
async fn test_ping_and_status() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    assert!(matches!(
        client.send_request(IpcRequest::Ping).await,
        IpcResponse::Pong
    ));

    match client.send_request(IpcRequest::GetStatus).await {
        IpcResponse::Status(status) => {
            assert!(!status.version.is_empty());
            assert_eq!(status.bind_address, cluster.state.config.bind_address);
            assert_eq!(status.connection_count, 0);
            assert_eq!(status.session_count, 0);
        }
        other => panic!("Unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_request_keeps_connection() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    match client.send_raw("{\"type\":\"launch_rockets\"}").await {
        IpcResponse::Error { message } => assert!(message.starts_with("Invalid request")),
        other => panic!("Unexpected response: {:?}", other),
    }
    assert!(matches!(
        client.send_request(IpcRequest::Ping).await,
        IpcResponse::Pong
    ));
}

#[tokio::test]
async fn test_apply_template_creates_then_updates() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    match client
        .send_request(apply("web", "ubuntu:24.04", SessionKind::Ephemeral))
        .await
    {
        IpcResponse::Template { template } => assert_eq!(template.spec.image, "ubuntu:24.04"),
        other => panic!("Unexpected response: {:?}", other),
    }
    match client
        .send_request(apply("web", "debian:12", SessionKind::Ephemeral))
        .await
    {
        IpcResponse::Template { template } => assert_eq!(template.spec.image, "debian:12"),
        other => panic!("Unexpected response: {:?}", other),
    }

    match client.send_request(IpcRequest::ListTemplates).await {
        IpcResponse::Templates { templates } => {
            assert_eq!(templates.len(), 1);
            assert_eq!(templates[0].name, "web");
            assert_eq!(templates[0].image, "debian:12");
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    assert!(matches!(
        client
            .send_request(IpcRequest::DeleteTemplate { name: "web".into() })
            .await,
        IpcResponse::Ok
    ));
    assert!(matches!(
        client
            .send_request(IpcRequest::GetTemplate { name: "web".into() })
            .await,
        IpcResponse::Error { .. }
    ));
}

#[tokio::test]
async fn test_invalid_template_is_rejected() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    match client
        .send_request(apply("web", "", SessionKind::Ephemeral))
        .await
    {
        IpcResponse::Error { message } => assert!(message.contains("web")),
        other => panic!("Unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_instance_from_template() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;
    client
        .send_request(apply("db", "postgres:16", SessionKind::Persistent))
        .await;

    match client.send_request(create("alice", Some("db"))).await {
        IpcResponse::Instance { instance } => {
            assert_eq!(instance.name(), "alice-db");
            assert_eq!(instance.owner(), "alice");
            assert_eq!(instance.spec.kind, SessionKind::Persistent);
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    match client.send_request(create("alice", Some("db"))).await {
        IpcResponse::Error { message } => assert!(message.contains("already exists")),
        other => panic!("Unexpected response: {:?}", other),
    }

    match client
        .send_request(IpcRequest::ListInstances {
            owner: Some("alice".into()),
        })
        .await
    {
        IpcResponse::Instances { instances } => {
            assert_eq!(instances.len(), 1);
            assert_eq!(instances[0].template.as_deref(), Some("db"));
        }
        other => panic!("Unexpected response: {:?}", other),
    }
    match client
        .send_request(IpcRequest::ListInstances {
            owner: Some("bob".into()),
        })
        .await
    {
        IpcResponse::Instances { instances } => assert!(instances.is_empty()),
        other => panic!("Unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_instance_needs_name_or_template() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    assert!(matches!(
        client.send_request(create("alice", None)).await,
        IpcResponse::Error { .. }
    ));
}

#[tokio::test]
async fn test_delete_instance() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;
    client
        .send_request(apply("db", "postgres:16", SessionKind::Persistent))
        .await;
    client.send_request(create("alice", Some("db"))).await;

    assert!(matches!(
        client
            .send_request(IpcRequest::DeleteInstance {
                name: "alice-db".into()
            })
            .await,
        IpcResponse::Ok
    ));
    // no controller finalizer, so the delete is immediate
    assert!(matches!(
        client
            .send_request(IpcRequest::GetInstance {
                name: "alice-db".into()
            })
            .await,
        IpcResponse::Error { .. }
    ));
    assert!(matches!(
        client
            .send_request(IpcRequest::DeleteInstance {
                name: "alice-db".into()
            })
            .await,
        IpcResponse::Error { .. }
    ));
}

#[tokio::test]
async fn test_watch_streams_changes() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let address = serve(&cluster).await;
    let mut watcher = TestClient::connect(&address).await;
    let mut client = TestClient::connect(&address).await;

    assert!(matches!(
        watcher
            .send_request(IpcRequest::Watch {
                kinds: vec![Kind::Template, Kind::Instance],
            })
            .await,
        IpcResponse::Subscribed
    ));

    client
        .send_request(apply("db", "postgres:16", SessionKind::Persistent))
        .await;
    let IpcEvent::Changed {
        event_type,
        kind,
        name,
        phase,
        ..
    } = watcher.next_event().await;
    assert_eq!(event_type, EventType::Added);
    assert_eq!(kind, Kind::Template);
    assert_eq!(name, "db");
    assert!(phase.is_none());

    client.send_request(create("alice", Some("db"))).await;
    let IpcEvent::Changed {
        kind, name, phase, ..
    } = watcher.next_event().await;
    assert_eq!(kind, Kind::Instance);
    assert_eq!(name, "alice-db");
    assert!(phase.is_some());
}

#[tokio::test]
async fn test_watch_rejects_internal_kinds() {
    let cluster = Cluster::without_controller(gateway_config()).await;
    let mut client = TestClient::connect(&serve(&cluster).await).await;

    assert!(matches!(
        client
            .send_request(IpcRequest::Watch {
                kinds: vec![Kind::Pod],
            })
            .await,
        IpcResponse::Error { .. }
    ));
}
