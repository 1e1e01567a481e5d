use crate::connection::{ConnectionId, Session};
use crate::error::{send_error, Error, SendErrorKind};
use crate::metrics::{self, MessageType};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::*;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

/// Default upper bound on a single send before the session is treated as lost.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry-owned record for one live session.
pub struct SessionEntry {
    id: ConnectionId,
    handle: Arc<dyn Session>,
    connected_at: DateTime<Utc>,
    // Monotonic start used for durations; `connected_at` is wall-clock for display only.
    started: Instant,
    message_count: AtomicU64,
}

impl SessionEntry {
    fn new(id: ConnectionId, handle: Arc<dyn Session>) -> Self {
        Self {
            id,
            handle,
            connected_at: Utc::now(),
            started: Instant::now(),
            message_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Acquire)
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    fn record_sent(&self) {
        self.message_count.fetch_add(1, Ordering::AcqRel);
    }

    fn stats(&self) -> ConnectionStat {
        ConnectionStat {
            id: self.id.to_string(),
            connected_at: self.connected_at,
            message_count: self.message_count(),
            duration: self.duration().as_secs_f64(),
        }
    }
}

/// Point-in-time view of a single session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionStat {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub message_count: u64,
    /// Seconds since the session was registered.
    pub duration: f64,
}

/// Read model returned by `ConnectionRegistry::stats`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub connections: Vec<ConnectionStat>,
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// Size of the snapshot the message was fanned out to.
    pub connection_count: usize,
    pub successful_sends: usize,
    pub failed_sends: usize,
    pub message_length: usize,
    pub duration: Duration,
    /// Sessions removed because delivery failed.
    pub dropped: Vec<ConnectionId>,
}

/// Owns the set of live sessions.
///
/// The session map sits behind a single lock that is only ever held for one
/// step (insert, remove, or copying out a snapshot) and never across an
/// `.await`. Iterating operations work on a snapshot of `Arc` entries, so
/// concurrent registration or removal cannot disturb an in-flight broadcast.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<SessionEntry>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register an accepted session and return its freshly generated id.
    pub fn register(&self, handle: Arc<dyn Session>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let entry = Arc::new(SessionEntry::new(connection_id.clone(), handle));

        let total = {
            let mut connections = self.connections.write();
            connections.insert(connection_id.clone(), entry);
            let total = connections.len();
            // Set under the lock so concurrent updates cannot publish a stale count
            metrics::set_active_connections(total);
            total
        };

        info!("WebSocket connected: {connection_id}. Total connections: {total}");
        connection_id
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn deregister(&self, connection_id: &ConnectionId) {
        let (removed, remaining) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(connection_id);
            let remaining = connections.len();
            if removed.is_some() {
                metrics::set_active_connections(remaining);
            }
            (removed, remaining)
        };

        let Some(entry) = removed else {
            trace!("Ignoring deregister for unknown connection {connection_id}");
            return;
        };

        let duration = entry.duration();
        metrics::record_connection_duration(duration);

        info!(
            "WebSocket disconnected: {connection_id}. Duration: {:.2}s, Messages: {}. Remaining connections: {remaining}",
            duration.as_secs_f64(),
            entry.message_count(),
        );
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Send a message to a single session.
    ///
    /// Sending to an unknown id is a no-op. A failed send drops the session and
    /// the error is returned for information only; the registry has already
    /// handled it.
    pub async fn send_direct(
        &self,
        connection_id: &ConnectionId,
        message: &str,
    ) -> Result<(), Error> {
        let Some(entry) = self.get(connection_id) else {
            debug!("Skipping direct message to unknown connection {connection_id}");
            return Ok(());
        };

        match self.deliver(&entry, message).await {
            Ok(()) => {
                entry.record_sent();
                metrics::record_messages(MessageType::Direct, 1);
                trace!(
                    "Sent direct message to {connection_id} (message_length={})",
                    message.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Error sending message to {connection_id}: {e}");
                metrics::record_send_failures(MessageType::Direct, 1);
                self.deregister(connection_id);
                Err(e)
            }
        }
    }

    /// Deliver a message to every session registered at the time of the call.
    ///
    /// Sends run concurrently and independently. Sessions whose delivery fails
    /// are deregistered once the whole pass has completed.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            debug!("No active connections to broadcast to");
            return BroadcastReport {
                message_length: message.len(),
                ..Default::default()
            };
        }

        let started = Instant::now();
        let connection_count = snapshot.len();
        debug!("Broadcasting to {connection_count} connections: {message}");

        let results = join_all(snapshot.iter().map(|entry| async move {
            let result = self.deliver(entry, message).await;
            (entry, result)
        }))
        .await;

        let mut dropped = Vec::new();
        let mut successful_sends = 0;
        for (entry, result) in results {
            match result {
                Ok(()) => {
                    entry.record_sent();
                    successful_sends += 1;
                }
                Err(e) => {
                    error!("Error broadcasting to {}: {e}", entry.id());
                    dropped.push(entry.id().clone());
                }
            }
        }

        for connection_id in &dropped {
            self.deregister(connection_id);
        }

        let duration = started.elapsed();
        let failed_sends = dropped.len();
        metrics::record_broadcast(successful_sends, message.len(), duration);
        metrics::record_messages(MessageType::Broadcast, successful_sends as u64);
        metrics::record_send_failures(MessageType::Broadcast, failed_sends as u64);

        info!(
            "Broadcast complete: connection_count={connection_count}, successful_sends={successful_sends}, \
             failed_sends={failed_sends}, message_length={}, broadcast_duration={:.6}s",
            message.len(),
            duration.as_secs_f64(),
        );

        BroadcastReport {
            connection_count,
            successful_sends,
            failed_sends,
            message_length: message.len(),
            duration,
            dropped,
        }
    }

    /// Consistent read of all sessions as of the call.
    pub fn stats(&self) -> ConnectionStats {
        let connections: Vec<ConnectionStat> =
            self.snapshot().iter().map(|entry| entry.stats()).collect();

        ConnectionStats {
            total_connections: connections.len(),
            connections,
        }
    }

    fn get(&self, connection_id: &ConnectionId) -> Option<Arc<SessionEntry>> {
        self.connections.read().get(connection_id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        self.connections.read().values().cloned().collect()
    }

    async fn deliver(&self, entry: &SessionEntry, message: &str) -> Result<(), Error> {
        match tokio::time::timeout(self.send_timeout, entry.handle.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(send_error(
                SendErrorKind::Timeout,
                &format!("send exceeded {:?}", self.send_timeout),
            )),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
