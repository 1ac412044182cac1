//! Client side of a bridge

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

use crate::error::BridgeError;

/// The SSH channel a bridge writes to
#[async_trait]
pub trait ClientChannel: Send + Sync {
    async fn data(&self, bytes: &[u8]) -> Result<(), BridgeError>;

    async fn exit_status(&self, code: u32);

    async fn eof(&self);

    async fn close(&self);

    /// Write a line of text, translating newlines for terminals
    async fn message(&self, text: &str) -> Result<(), BridgeError> {
        let mut line = text.replace('\n', "\r\n");
        if !line.ends_with("\r\n") {
            line.push_str("\r\n");
        }
        self.data(line.as_bytes()).await
    }

    /// Exit status, EOF and close, in that order
    async fn finish(&self, code: u32) {
        self.exit_status(code).await;
        self.eof().await;
        self.close().await;
    }
}

/// A russh session channel
#[derive(Clone)]
pub struct ChannelSink {
    handle: Handle,
    channel: ChannelId,
}

impl ChannelSink {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

#[async_trait]
impl ClientChannel for ChannelSink {
    async fn data(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    async fn exit_status(&self, code: u32) {
        if self
            .handle
            .exit_status_request(self.channel, code)
            .await
            .is_err()
        {
            tracing::debug!("Could not send exit status on {:?}", self.channel);
        }
    }

    async fn eof(&self) {
        let _ = self.handle.eof(self.channel).await;
    }

    async fn close(&self) {
        let _ = self.handle.close(self.channel).await;
    }
}
