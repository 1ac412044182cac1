//! SSH connection handler
//!
//! Implements the russh server handler for user logins. Each session
//! channel gets its own router and bridge task; the handler only feeds it
//! client input, window credit and resize events.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bw_core::resolver::parse_login;
use bw_core::traits::ExecRequest;
use bw_core::TerminalSize;

use crate::bridge::{ChannelSink, InputQueue, SendWindow, INPUT_QUEUE_DEPTH};
use crate::session::{run_session, SessionIo};
use crate::state::{CountGuard, GatewayState};

const RESIZE_QUEUE_DEPTH: usize = 8;

/// Packet size every SSH implementation must accept
const STANDARD_PACKET_SIZE: usize = 32_768;

/// Shell used to run `ssh host <command>` requests inside the pod
const EXEC_SHELL: &str = "/bin/sh";

/// Per-channel state, from open to close
struct ChannelState {
    window: Arc<SendWindow>,
    pty: Option<(String, TerminalSize)>,
    env: BTreeMap<String, String>,
    /// A shell or exec request has been accepted
    started: bool,
    /// Dropped when the client overruns it, which ends the bridge
    input: Option<InputQueue>,
    resize: Option<mpsc::Sender<TerminalSize>>,
}

/// Handler for a single SSH client connection
pub struct ConnectionHandler {
    state: Arc<GatewayState>,
    peer_addr: SocketAddr,
    /// Full login, set after authentication
    login: Option<String>,
    channels: HashMap<ChannelId, ChannelState>,
    /// Cancelled when the connection goes away
    cancel: CancellationToken,
    _connection: CountGuard,
}

impl ConnectionHandler {
    pub fn new(state: Arc<GatewayState>, peer_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            _connection: state.track_connection(),
            state,
            peer_addr,
            login: None,
            channels: HashMap::new(),
            cancel,
        }
    }

    fn authorize(&self, user: &str, public_key: &PublicKey) -> bool {
        let owner = match parse_login(user) {
            Ok((owner, _)) => owner,
            Err(e) => {
                tracing::warn!("Rejecting login from {}: {}", self.peer_addr, e);
                return false;
            }
        };
        if self.state.config.allow_unknown_users {
            return true;
        }
        self.state.users.is_authorized(owner, public_key)
    }

    /// Start routing and bridging for a shell or exec request
    fn start(&mut self, channel: ChannelId, command: Vec<String>, session: &mut Session) {
        let Some(login) = self.login.clone() else {
            session.channel_failure(channel);
            return;
        };
        let Some(state) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel);
            return;
        };
        if state.started {
            tracing::debug!("Ignoring second session request on {:?}", channel);
            session.channel_failure(channel);
            return;
        }

        let (term, size) = match &state.pty {
            Some((term, size)) => (Some(term.clone()), Some(*size)),
            None => (None, None),
        };
        let request = ExecRequest {
            command,
            tty: state.pty.is_some(),
            size,
            term,
            env: state.env.clone(),
        };

        let (input_tx, input_rx) = InputQueue::bounded(INPUT_QUEUE_DEPTH);
        let (resize_tx, resize_rx) = mpsc::channel(RESIZE_QUEUE_DEPTH);
        state.started = true;
        state.input = Some(input_tx);
        state.resize = Some(resize_tx);

        let io = SessionIo {
            channel: ChannelSink::new(session.handle(), channel),
            input: input_rx,
            resize: resize_rx,
            window: state.window.clone(),
        };
        tokio::spawn(run_session(
            self.state.clone(),
            login,
            request,
            io,
            self.cancel.child_token(),
        ));

        session.channel_success(channel);
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        for state in self.channels.values() {
            state.window.close();
        }
    }
}

/// Send credit before the client's first window adjustment.
///
/// russh only reports the smaller of the client's window and its maximum
/// packet size. Below the standard packet size that is the window itself;
/// otherwise the configured window applies.
fn initial_credit(writable: usize, configured: u32) -> usize {
    let configured = configured as usize;
    if writable < STANDARD_PACKET_SIZE {
        writable.min(configured)
    } else {
        configured
    }
}

/// Variables a client may pass with `SendEnv`
fn accepts_env(name: &str) -> bool {
    name == "LANG" || name.starts_with("LC_")
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    /// Public key authentication against the owner part of the login
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();
        tracing::info!(
            "Auth attempt from {} as {}, key fingerprint: {}",
            self.peer_addr,
            user,
            fingerprint
        );

        if self.authorize(user, public_key) {
            self.login = Some(user.to_string());
            return Ok(Auth::Accept);
        }

        tracing::warn!(
            "Authentication rejected for {} from {} ({})",
            user,
            self.peer_addr,
            fingerprint
        );
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let credit = initial_credit(
            channel.writable_packet_size().await,
            self.state.config.initial_window,
        );
        tracing::debug!("Channel opened: {:?}, initial credit {}", id, credit);
        self.channels.insert(
            id,
            ChannelState {
                window: Arc::new(SendWindow::new(credit)),
                pty: None,
                env: BTreeMap::new(),
                started: false,
                input: None,
                resize: None,
            },
        );
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channels.get_mut(&channel) {
            Some(state) => {
                state.pty = Some((
                    term.to_string(),
                    TerminalSize::from_ssh(col_width, row_height),
                ));
                session.channel_success(channel);
            }
            None => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channels.get_mut(&channel) {
            Some(state) if accepts_env(variable_name) => {
                state
                    .env
                    .insert(variable_name.to_string(), variable_value.to_string());
                session.channel_success(channel);
            }
            _ => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.start(channel, Vec::new(), session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        tracing::debug!("Exec request on {:?}: {}", channel, command);
        self.start(
            channel,
            vec![EXEC_SHELL.to_string(), "-c".to_string(), command],
            session,
        );
        Ok(())
    }

    /// Client input. A client that overruns the bridge's queue loses its
    /// session rather than stalling the connection.
    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Received {} bytes on channel {:?}", data.len(), channel);
        let Some(state) = self.channels.get_mut(&channel) else {
            return Ok(());
        };
        let Some(input) = &state.input else {
            return Ok(());
        };
        if input.offer(data).is_err() {
            tracing::warn!(
                "Input on {:?} from {} outran the pod; closing the session",
                channel,
                self.peer_addr
            );
            state.input = None;
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let size = TerminalSize::from_ssh(col_width, row_height);
        if let Some(resize) = self.channels.get(&channel).and_then(|s| s.resize.as_ref()) {
            // a newer resize supersedes one that does not fit
            let _ = resize.try_send(size);
        }
        Ok(())
    }

    async fn window_adjusted(
        &mut self,
        channel: ChannelId,
        new_size: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            tracing::trace!("Window on {:?} is now {}", channel, new_size);
            state.window.reset(new_size as usize);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        if let Some(input) = self.channels.get(&channel).and_then(|s| s.input.as_ref()) {
            input.eof();
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        if let Some(state) = self.channels.remove(&channel) {
            state.window.close();
        }
        Ok(())
    }
}

/// Configuration for the SSH server
#[derive(Clone)]
pub struct ServerConfig {
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    pub fn new(
        host_key: russh_keys::key::KeyPair,
        auth_rejection_time: std::time::Duration,
    ) -> Self {
        let config = russh::server::Config {
            keys: vec![host_key],
            auth_rejection_time,
            auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
            ..Default::default()
        };

        Self {
            ssh_config: Arc::new(config),
        }
    }
}
