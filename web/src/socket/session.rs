//! `Session` implementation over an axum WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use log::*;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use ws::error::{Error, ErrorKind, SendErrorKind};
use ws::Session;

/// Write half of an accepted WebSocket.
///
/// Writes are serialized by the mutex, so messages reach the client in the
/// order `send` was called. A send that errors or is dropped before completing
/// (for example by the registry's send timeout) marks the session as failed.
pub(crate) struct WebSocketSession {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    failed: CancellationToken,
}

impl WebSocketSession {
    pub(crate) fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            failed: CancellationToken::new(),
        }
    }

    /// Resolves once a write on this session has failed or been abandoned.
    pub(crate) async fn failed(&self) {
        self.failed.cancelled().await
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.is_cancelled()
    }

    /// Best-effort close frame. Skipped after a failed write, since the sink
    /// may hold a partially written frame.
    pub(crate) async fn close(&self) {
        if self.is_failed() {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            trace!("Error closing WebSocket sink: {e}");
        }
    }
}

#[async_trait]
impl Session for WebSocketSession {
    async fn send(&self, message: &str) -> Result<(), Error> {
        // Fires on error and on cancellation; disarmed only once the frame is flushed
        let guard = self.failed.clone().drop_guard();

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(message.into()))
            .await
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Send(SendErrorKind::Transport),
            })?;

        guard.disarm();
        Ok(())
    }
}
