//! Exec sessions against the local node

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use bw_core::config::NodeConfig;
use bw_core::model::PodSpec;
use bw_core::traits::{ExecRequest, PodExecutor, ResourceStore};
use bw_core::{ExecError, ObjectMeta, Pod};
use bw_node::NodeRuntime;
use bw_store::{Api, MemoryStore};

fn node_config(dir: &std::path::Path) -> NodeConfig {
    NodeConfig {
        name: "it-node".into(),
        data_dir: dir.to_path_buf(),
        shell: "/bin/sh".into(),
        max_pods: 4,
        startup_delay_ms: Duration::ZERO,
    }
}

async fn running_pod(api: &Api<Pod>, name: &str) {
    api.create(Pod {
        metadata: ObjectMeta::named(name),
        spec: PodSpec {
            image: "alpine".into(),
            ..Default::default()
        },
        status: Default::default(),
    })
    .await
    .unwrap();

    for _ in 0..200 {
        if api.get(name).await.unwrap().is_running_and_ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pod {} never started", name);
}

#[tokio::test]
async fn test_exec_output_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let pods: Api<Pod> = Api::new(store.clone());
    let node = NodeRuntime::new(node_config(dir.path()), store.clone());
    let cancel = CancellationToken::new();
    tokio::spawn(node.clone().run(cancel.clone()));

    running_pod(&pods, "alice-web-pod").await;

    let mut stream = node
        .executor()
        .exec(
            "alice-web-pod",
            ExecRequest {
                command: vec!["/bin/sh".into(), "-c".into(), "echo burrow-$BURROW_POD; exit 3".into()],
                tty: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.output.read_to_end(&mut output))
        .await
        .expect("output never reached EOF")
        .unwrap();
    assert!(String::from_utf8_lossy(&output).contains("burrow-alice-web-pod"));

    let status = tokio::time::timeout(Duration::from_secs(10), stream.exit)
        .await
        .expect("exit status never arrived")
        .unwrap();
    assert_eq!(status.code, Some(3));

    cancel.cancel();
}

#[tokio::test]
async fn test_deleting_pod_kills_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let pods: Api<Pod> = Api::new(store.clone());
    let node = NodeRuntime::new(node_config(dir.path()), store.clone());
    let cancel = CancellationToken::new();
    tokio::spawn(node.clone().run(cancel.clone()));

    running_pod(&pods, "bob-lab-pod").await;

    let mut stream = node
        .executor()
        .exec("bob-lab-pod", ExecRequest::default())
        .await
        .unwrap();
    stream.stdin.write_all(b"echo started\n").await.unwrap();
    assert_eq!(node.sessions().count("bob-lab-pod"), 1);

    pods.delete("bob-lab-pod").await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), stream.exit)
        .await
        .expect("session survived pod deletion")
        .unwrap();
    assert_ne!(status.code, Some(0));
    assert_eq!(node.sessions().count("bob-lab-pod"), 0);

    cancel.cancel();
}

#[tokio::test]
async fn test_exec_requires_running_pod() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
    let node = NodeRuntime::new(node_config(dir.path()), store.clone());

    let err = node
        .executor()
        .exec("missing-pod", ExecRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::PodNotFound(_)));

    let pods: Api<Pod> = Api::new(store.clone());
    pods.create(Pod {
        metadata: ObjectMeta::named("idle-pod"),
        spec: PodSpec::default(),
        status: Default::default(),
    })
    .await
    .unwrap();

    let err = node
        .executor()
        .exec("idle-pod", ExecRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::PodNotRunning(_)));
}
