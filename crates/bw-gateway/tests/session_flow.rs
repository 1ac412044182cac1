//! End-to-end sessions: routing, exec into a local pod and bridging

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bw_core::traits::ExecRequest;
use bw_core::{Instance, SessionKind};
use bw_gateway::bridge::{ClientInput, SendWindow};
use bw_gateway::session::{run_session, SessionIo};
use bw_gateway::GatewayState;
use bw_store::Api;

use common::{gateway_config, Cluster, RecordingChannel, Sent};

fn exec(command: &str) -> ExecRequest {
    ExecRequest {
        command: vec!["/bin/sh".into(), "-c".into(), command.into()],
        tty: false,
        size: None,
        term: None,
        env: BTreeMap::new(),
    }
}

fn shell() -> ExecRequest {
    ExecRequest {
        command: Vec::new(),
        tty: true,
        size: None,
        term: Some("xterm".into()),
        env: BTreeMap::new(),
    }
}

/// Run one session to completion; the input queue stays open throughout
async fn session(state: &Arc<GatewayState>, login: &str, request: ExecRequest) -> RecordingChannel {
    let channel = RecordingChannel::default();
    let (input_tx, input_rx) = mpsc::channel::<ClientInput>(16);
    let (_resize_tx, resize_rx) = mpsc::channel(4);
    let io = SessionIo {
        channel: channel.clone(),
        input: input_rx,
        resize: resize_rx,
        window: Arc::new(SendWindow::new(64 * 1024)),
    };

    tokio::time::timeout(
        Duration::from_secs(20),
        run_session(
            state.clone(),
            login.to_string(),
            request,
            io,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("session did not finish");
    drop(input_tx);
    channel
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exec_reports_output_and_exit_code() {
    let cluster = Cluster::start(gateway_config()).await;
    cluster.template("web", SessionKind::Ephemeral).await;

    let channel = session(&cluster.state, "alice-web", exec("echo hello-burrow; exit 7")).await;

    assert!(channel.output_text().contains("hello-burrow"));
    assert_eq!(
        channel.trailer(),
        vec![Sent::ExitStatus(7), Sent::Eof, Sent::Close]
    );
    assert_eq!(cluster.state.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_records_activity() {
    let cluster = Cluster::start(gateway_config()).await;
    cluster.template("web", SessionKind::Ephemeral).await;

    session(&cluster.state, "alice-web", exec("echo active")).await;

    let instances: Api<Instance> = Api::new(cluster.store());
    for _ in 0..200 {
        let instance = instances.get("alice-web").await.unwrap();
        if instance.status.last_active.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("last_active was never recorded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admin_login_lists_and_exits() {
    let cluster = Cluster::start(gateway_config()).await;
    cluster.template("web", SessionKind::Ephemeral).await;

    let channel = session(&cluster.state, "alice", shell()).await;

    let text = channel.output_text();
    assert!(text.contains("web"));
    assert!(text.contains("alice-web"));
    assert_eq!(
        channel.trailer(),
        vec![Sent::ExitStatus(0), Sent::Eof, Sent::Close]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_selector_exits_with_error_line() {
    let cluster = Cluster::start(gateway_config()).await;

    let channel = session(&cluster.state, "alice-nope", shell()).await;

    let text = channel.output_text();
    assert!(text.starts_with("burrow: "));
    assert!(text.contains("nope"));
    assert!(text.ends_with("\r\n"));
    assert_eq!(
        channel.trailer(),
        vec![Sent::ExitStatus(1), Sent::Eof, Sent::Close]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistent_template_login_explains_itself() {
    let cluster = Cluster::start(gateway_config()).await;
    cluster.template("db", SessionKind::Persistent).await;

    let channel = session(&cluster.state, "alice-db", shell()).await;

    assert!(channel.output_text().starts_with("burrow: "));
    assert_eq!(channel.trailer()[0], Sent::ExitStatus(1));
}
