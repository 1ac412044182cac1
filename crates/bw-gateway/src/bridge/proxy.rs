//! Full-duplex proxy between an SSH channel and a pod exec stream

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use bw_core::config::GatewayConfig;
use bw_core::traits::{ExecStream, ExitStatus};
use bw_core::TerminalSize;

use super::sink::ClientChannel;
use super::window::SendWindow;
use crate::error::BridgeError;

/// How long to wait for the runtime's exit status after the pod's output ends
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(5);

/// What the SSH handler feeds into a bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    Data(Bytes),
    /// The client will send no more data; the channel stays open
    Eof,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Largest read from the pod stream
    pub chunk_size: usize,
    /// Flush window for the surviving direction once one side has closed
    pub linger: Duration,
}

impl From<&GatewayConfig> for BridgeConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            linger: config.linger_ms,
        }
    }
}

/// Bytes moved since the last check, in either direction
#[derive(Debug, Default)]
pub struct Activity {
    bytes: AtomicU64,
}

impl Activity {
    pub fn record(&self, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes since the previous call
    pub fn take(&self) -> u64 {
        self.bytes.swap(0, Ordering::Relaxed)
    }
}

/// Which side ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The pod's output reached EOF
    PodExited,
    /// The client closed the channel
    ClientClosed,
    /// The connection was torn down
    Cancelled,
}

#[derive(Debug)]
pub struct BridgeOutcome {
    pub end: BridgeEnd,
    /// Reported to the client; `None` if the runtime gave none in time
    pub exit: Option<ExitStatus>,
    pub bytes_to_client: u64,
    pub bytes_to_pod: u64,
}

pub struct Bridge<C> {
    config: BridgeConfig,
    channel: C,
    window: Arc<SendWindow>,
    activity: Arc<Activity>,
}

impl<C: ClientChannel> Bridge<C> {
    pub fn new(
        config: BridgeConfig,
        channel: C,
        window: Arc<SendWindow>,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            config,
            channel,
            window,
            activity,
        }
    }

    /// Proxy until one side ends, then tear both down.
    ///
    /// On pod EOF the client gets the remaining output, the exit status
    /// (255 when none is known), EOF and close, in that order.
    pub async fn run(
        self,
        exec: ExecStream,
        mut input: mpsc::Receiver<ClientInput>,
        resize: mpsc::Receiver<TerminalSize>,
        cancel: CancellationToken,
    ) -> BridgeOutcome {
        let ExecStream {
            mut stdin,
            mut output,
            resize: pod_resize,
            exit,
        } = exec;

        let stop = cancel.child_token();
        let resizer = tokio::spawn(forward_resize(resize, pod_resize, stop.clone()));

        let mut to_client = 0u64;
        let mut to_pod = 0u64;

        let end = {
            let output_loop = self.pump_output(&mut output, &mut to_client);
            let input_loop = pump_input(&mut input, &mut stdin, &self.activity, &mut to_pod);
            tokio::pin!(output_loop, input_loop);

            tokio::select! {
                result = &mut output_loop => match result {
                    Ok(()) => BridgeEnd::PodExited,
                    Err(BridgeError::ChannelClosed) => {
                        debug!("Client channel closed under pod output");
                        BridgeEnd::ClientClosed
                    }
                    Err(e) => {
                        debug!("Pod to client copy ended: {}", e);
                        BridgeEnd::PodExited
                    }
                },
                _ = &mut input_loop => {
                    if tokio::time::timeout(self.config.linger, &mut output_loop).await.is_err() {
                        trace!("Output linger expired");
                    }
                    BridgeEnd::ClientClosed
                }
                _ = cancel.cancelled() => BridgeEnd::Cancelled,
            }
        };

        let mut exit_status = None;
        match end {
            BridgeEnd::PodExited => {
                let drained = tokio::time::timeout(
                    self.config.linger,
                    drain_queued(&mut input, &mut stdin),
                )
                .await;
                if drained.is_err() {
                    trace!("Input linger expired");
                }

                exit_status = match tokio::time::timeout(EXIT_STATUS_WAIT, exit).await {
                    Ok(Ok(status)) => Some(status),
                    _ => None,
                };
                let code = exit_status.map_or(255, |s| s.ssh_code());
                self.channel.finish(code).await;
            }
            BridgeEnd::ClientClosed | BridgeEnd::Cancelled => {
                self.channel.close().await;
            }
        }

        stop.cancel();
        let _ = resizer.await;
        let _ = stdin.shutdown().await;

        BridgeOutcome {
            end,
            exit: exit_status,
            bytes_to_client: to_client,
            bytes_to_pod: to_pod,
        }
    }

    /// Pod to client. Credit is taken before each read, so the pod is not
    /// read at all while the client's window is exhausted.
    async fn pump_output<R>(&self, output: &mut R, sent: &mut u64) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let credit = self
                .window
                .acquire(buf.len())
                .await
                .ok_or(BridgeError::ChannelClosed)?;

            let n = match output.read(&mut buf[..credit]).await {
                Ok(n) => n,
                Err(e) => {
                    self.window.release(credit);
                    return Err(e.into());
                }
            };
            self.window.release(credit - n);
            if n == 0 {
                return Ok(());
            }

            self.channel.data(&buf[..n]).await?;
            *sent += n as u64;
            self.activity.record(n);
            trace!("{} bytes to client", n);
        }
    }
}

/// Client to pod, until the client closes the channel. Input after EOF or
/// after the pod stopped accepting it is discarded.
async fn pump_input<W>(
    input: &mut mpsc::Receiver<ClientInput>,
    stdin: &mut W,
    activity: &Activity,
    received: &mut u64,
) where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut open = true;
    while let Some(message) = input.recv().await {
        match message {
            ClientInput::Data(bytes) if open => {
                if let Err(e) = write_chunk(stdin, &bytes).await {
                    debug!("Pod stopped accepting input: {}", e);
                    open = false;
                    continue;
                }
                *received += bytes.len() as u64;
                activity.record(bytes.len());
            }
            ClientInput::Data(_) => {}
            ClientInput::Eof => {
                if open {
                    let _ = stdin.shutdown().await;
                    open = false;
                }
            }
        }
    }
}

/// Write whatever input is already queued, without waiting for more
async fn drain_queued<W>(input: &mut mpsc::Receiver<ClientInput>, stdin: &mut W)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while let Ok(ClientInput::Data(bytes)) = input.try_recv() {
        if write_chunk(stdin, &bytes).await.is_err() {
            break;
        }
    }
}

async fn write_chunk<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

async fn forward_resize(
    mut from_client: mpsc::Receiver<TerminalSize>,
    to_pod: mpsc::Sender<TerminalSize>,
    cancel: CancellationToken,
) {
    loop {
        let size = tokio::select! {
            _ = cancel.cancelled() => break,
            size = from_client.recv() => match size {
                Some(size) => size,
                None => break,
            },
        };
        if to_pod.send(size).await.is_err() {
            break;
        }
    }
}
