//! SSH server listener
//!
//! Accepts incoming connections and spawns a handler for each client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::server::handler::{ConnectionHandler, ServerConfig};
use crate::state::GatewayState;

/// SSH server that listens for user connections
pub struct SshServer {
    config: ServerConfig,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl SshServer {
    pub fn new(host_key: KeyPair, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::new(host_key, state.config.auth_rejection_time),
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => tracing::error!("Failed to accept connection: {}", e),
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.config.ssh_config);
        let connection = self.cancel.child_token();
        let handler = ConnectionHandler::new(Arc::clone(&self.state), peer_addr, connection.clone());

        tokio::spawn(async move {
            let session = match russh::server::run_stream(config, socket, handler).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            };

            let result = tokio::select! {
                _ = connection.cancelled() => {
                    tracing::debug!("Connection handler cancelled for {}", peer_addr);
                    return;
                }
                result = session => result,
            };

            match result {
                Ok(()) => tracing::info!("Connection from {} closed normally", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}
