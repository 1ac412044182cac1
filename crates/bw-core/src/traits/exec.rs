//! Pod exec stream abstraction

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::error::ExecError;
use crate::types::TerminalSize;

/// What to run inside the pod
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Empty runs the pod's own command
    pub command: Vec<String>,
    /// Allocate a terminal
    pub tty: bool,
    pub size: Option<TerminalSize>,
    pub term: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// How the exec'd process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<u32>,
}

impl ExitStatus {
    pub fn from_code(code: u32) -> Self {
        Self { code: Some(code) }
    }

    /// Exit code to report to SSH clients; 255 when the runtime had none
    pub fn ssh_code(&self) -> u32 {
        self.code.unwrap_or(255)
    }
}

/// A running exec session: the pod side of a bridge
pub struct ExecStream {
    /// Process stdin
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Process stdout and stderr, combined
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    /// Terminal resize requests
    pub resize: mpsc::Sender<TerminalSize>,
    /// Resolves once the process has exited
    pub exit: oneshot::Receiver<ExitStatus>,
}

impl std::fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStream").finish_non_exhaustive()
    }
}

/// Opens interactive streams into pods
#[async_trait]
pub trait PodExecutor: Send + Sync {
    async fn exec(&self, pod: &str, request: ExecRequest) -> Result<ExecStream, ExecError>;
}
