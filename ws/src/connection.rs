use crate::error::{send_error, Error, SendErrorKind};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Unique identifier for a connection (server-generated, never reused)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One bidirectional, message-oriented client connection.
///
/// Handles are handed to the registry after the accept/handshake has completed.
/// Implementations must deliver messages in the order `send` is called.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), Error>;
}

/// In-process session backed by an unbounded channel.
///
/// Sends fail with `SendErrorKind::Closed` once the receiving half is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSession {
    sender: UnboundedSender<String>,
}

impl ChannelSession {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Session for ChannelSession {
    async fn send(&self, message: &str) -> Result<(), Error> {
        self.sender
            .send(message.to_owned())
            .map_err(|_| send_error(SendErrorKind::Closed, "receiver dropped"))
    }
}
