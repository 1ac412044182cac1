//! PTY-backed pod exec
//!
//! Each exec opens a fresh pseudo-terminal on the host and starts the pod's
//! command in it. The blocking PTY handles are pumped into in-memory duplex
//! pipes by dedicated blocking tasks, so callers only see async streams.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use bw_core::config::NodeConfig;
use bw_core::traits::{ExecRequest, ExecStream, ExitStatus, PodExecutor};
use bw_core::{ExecError, PersistentVolumeClaim, Pod, TerminalSize};
use bw_store::Api;

use crate::sessions::SessionRegistry;
use crate::shell::validate_program;

const PIPE_CAPACITY: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;
const DEFAULT_TERM: &str = "xterm-256color";
/// Ctrl-D
const EOT: u8 = 0x04;

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Runs exec sessions for pods admitted by the local node
pub struct LocalExecutor {
    config: NodeConfig,
    pods: Api<Pod>,
    claims: Api<PersistentVolumeClaim>,
    sessions: Arc<SessionRegistry>,
}

impl LocalExecutor {
    pub fn new(
        config: NodeConfig,
        pods: Api<Pod>,
        claims: Api<PersistentVolumeClaim>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            pods,
            claims,
            sessions,
        }
    }

    fn build_command(
        &self,
        pod: &Pod,
        request: &ExecRequest,
        home: Option<&str>,
    ) -> Result<CommandBuilder, ExecError> {
        let argv: Vec<String> = if !request.command.is_empty() {
            request.command.clone()
        } else if !pod.spec.command.is_empty() {
            pod.spec.command.clone()
        } else {
            vec![self.config.shell.clone()]
        };

        let program = validate_program(&argv[0]).map_err(|e| ExecError::Spawn(e.to_string()))?;
        let mut cmd = CommandBuilder::new(program);
        cmd.args(&argv[1..]);

        cmd.env("TERM", request.term.as_deref().unwrap_or(DEFAULT_TERM));
        cmd.env("BURROW_POD", pod.name());
        for (key, value) in pod.spec.env.iter().chain(request.env.iter()) {
            cmd.env(key, value);
        }
        if let Some(home) = home {
            cmd.env("HOME", home);
            cmd.cwd(home);
        }
        Ok(cmd)
    }

    /// Host directory backing the pod's claim, when it has one
    async fn home_dir(&self, pod: &Pod) -> Result<Option<String>, ExecError> {
        let Some(mount) = &pod.spec.volume else {
            return Ok(None);
        };
        let claim = self.claims.get(&mount.claim_name).await?;
        Ok(claim.status.volume_path)
    }
}

#[async_trait]
impl PodExecutor for LocalExecutor {
    async fn exec(&self, pod_name: &str, request: ExecRequest) -> Result<ExecStream, ExecError> {
        let pod = match self.pods.get(pod_name).await {
            Ok(pod) => pod,
            Err(e) if e.is_not_found() => return Err(ExecError::PodNotFound(pod_name.to_string())),
            Err(e) => return Err(e.into()),
        };
        if !pod.is_running_and_ready() || pod.metadata.is_deleting() {
            return Err(ExecError::PodNotRunning(pod_name.to_string()));
        }

        let home = self.home_dir(&pod).await?;
        let cmd = self.build_command(&pod, &request, home.as_deref())?;
        let size = request.size.unwrap_or_default();

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| ExecError::Spawn(format!("failed to open PTY: {}", e)))?;
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ExecError::Spawn(e.to_string()))?;
        // The reader only sees EOF once no slave handle is left open here
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ExecError::Spawn(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ExecError::Spawn(format!("failed to take PTY writer: {}", e)))?;

        let session_id = self.sessions.register(pod_name, child.clone_killer());
        tracing::info!(
            "Started session {} in pod {} (pid {:?}, {}x{})",
            session_id,
            pod_name,
            child.process_id(),
            size.cols,
            size.rows
        );

        let runtime = Handle::current();
        let (output_rx, output_tx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdin_tx, stdin_rx) = tokio::io::duplex(PIPE_CAPACITY);
        spawn_output_pump(runtime.clone(), reader, output_tx, pod_name.to_string());
        spawn_input_pump(runtime, writer, stdin_rx, pod_name.to_string());

        let (resize_tx, resize_rx) = mpsc::channel(8);
        tokio::spawn(resize_loop(pair.master, resize_rx));

        let (exit_tx, exit_rx) = oneshot::channel();
        let sessions = self.sessions.clone();
        let name = pod_name.to_string();
        tokio::task::spawn_blocking(move || {
            let status = match child.wait() {
                Ok(status) => ExitStatus::from_code(status.exit_code()),
                Err(e) => {
                    tracing::warn!("Failed to wait for session {} in pod {}: {}", session_id, name, e);
                    ExitStatus { code: None }
                }
            };
            sessions.unregister(&name, session_id);
            tracing::info!("Session {} in pod {} exited with {:?}", session_id, name, status.code);
            let _ = exit_tx.send(status);
        });

        Ok(ExecStream {
            stdin: Box::new(stdin_tx),
            output: Box::new(output_rx),
            resize: resize_tx,
            exit: exit_rx,
        })
    }
}

/// Copy PTY output into the async pipe until the PTY closes or the reader
/// side is dropped.
fn spawn_output_pump(
    runtime: Handle,
    mut reader: Box<dyn Read + Send>,
    mut pipe: DuplexStream,
    pod: String,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if runtime.block_on(pipe.write_all(&buf[..n])).is_err() {
                        tracing::debug!("Output pipe for pod {} closed", pod);
                        break;
                    }
                }
                // EIO once the process side of the PTY has closed
                Err(e) => {
                    tracing::debug!("PTY reader for pod {} stopped: {}", pod, e);
                    break;
                }
            }
        }
        let _ = runtime.block_on(pipe.shutdown());
        tracing::trace!("Output pump for pod {} finished", pod);
    });
}

/// Copy client input from the async pipe into the PTY. A closed pipe is
/// passed on as the terminal's EOF character.
fn spawn_input_pump(
    runtime: Handle,
    mut writer: Box<dyn Write + Send>,
    mut pipe: DuplexStream,
    pod: String,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match runtime.block_on(pipe.read(&mut buf)) {
                Ok(0) => {
                    let _ = writer.write_all(&[EOT]).and_then(|_| writer.flush());
                    break;
                }
                Err(_) => break,
                Ok(n) => n,
            };
            if let Err(e) = writer.write_all(&buf[..n]).and_then(|_| writer.flush()) {
                tracing::debug!("PTY writer for pod {} stopped: {}", pod, e);
                break;
            }
        }
        tracing::trace!("Input pump for pod {} finished", pod);
    });
}

async fn resize_loop(master: Box<dyn MasterPty + Send>, mut sizes: mpsc::Receiver<TerminalSize>) {
    while let Some(size) = sizes.recv().await {
        tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        if let Err(e) = master.resize(pty_size(size)) {
            tracing::warn!("Failed to resize PTY: {}", e);
        }
    }
}
