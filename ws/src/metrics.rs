//! Instrumentation hooks emitted by the registry and the dispatcher.
//!
//! Only the `metrics` facade is used here; the binary decides which recorder
//! (if any) is installed.

use ::metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Active WebSocket connections (gauge).
pub const ACTIVE_CONNECTIONS: &str = "websocket_active_connections";
/// Messages successfully sent (counter, labels: `message_type`).
pub const MESSAGES_TOTAL: &str = "websocket_messages_total";
/// Failed sends (counter, labels: `message_type`).
pub const SEND_FAILURES_TOTAL: &str = "websocket_send_failures_total";
/// Connection lifetime in seconds, recorded on deregister (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "websocket_connection_duration_seconds";
/// Wall-clock time of a full broadcast pass (histogram).
pub const BROADCAST_DURATION_SECONDS: &str = "websocket_broadcast_duration_seconds";
/// Number of sessions a broadcast was delivered to (histogram).
pub const BROADCAST_FANOUT: &str = "websocket_broadcast_fanout";
/// Size of broadcast message bodies in bytes (histogram).
pub const BROADCAST_MESSAGE_BYTES: &str = "websocket_broadcast_message_bytes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Direct,
    Broadcast,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Direct => "direct",
            MessageType::Broadcast => "broadcast",
        }
    }
}

pub(crate) fn set_active_connections(count: usize) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

pub(crate) fn record_messages(message_type: MessageType, count: u64) {
    counter!(MESSAGES_TOTAL, "message_type" => message_type.as_str()).increment(count);
}

pub(crate) fn record_send_failures(message_type: MessageType, count: u64) {
    if count > 0 {
        counter!(SEND_FAILURES_TOTAL, "message_type" => message_type.as_str()).increment(count);
    }
}

pub(crate) fn record_connection_duration(duration: Duration) {
    histogram!(CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub(crate) fn record_broadcast(successful_sends: usize, message_length: usize, duration: Duration) {
    histogram!(BROADCAST_DURATION_SECONDS).record(duration.as_secs_f64());
    histogram!(BROADCAST_FANOUT).record(successful_sends as f64);
    histogram!(BROADCAST_MESSAGE_BYTES).record(message_length as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelSession, Session};
    use crate::registry::ConnectionRegistry;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::{CompositeKey, MetricKind};
    use std::future::Future;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Metric values observed while a scenario ran.
    struct Captured(Vec<(CompositeKey, DebugValue)>);

    impl Captured {
        fn find<'a>(
            &'a self,
            kind: MetricKind,
            name: &'a str,
        ) -> impl Iterator<Item = &'a (CompositeKey, DebugValue)> + 'a {
            self.0
                .iter()
                .filter(move |(key, _)| key.kind() == kind && key.key().name() == name)
        }

        fn gauge(&self, name: &str) -> Option<f64> {
            self.find(MetricKind::Gauge, name).find_map(|(_, value)| match value {
                DebugValue::Gauge(v) => Some(v.0),
                _ => None,
            })
        }

        fn counter(&self, name: &str, message_type: MessageType) -> Option<u64> {
            self.find(MetricKind::Counter, name)
                .filter(|(key, _)| {
                    key.key().labels().any(|label| {
                        label.key() == "message_type" && label.value() == message_type.as_str()
                    })
                })
                .find_map(|(_, value)| match value {
                    DebugValue::Counter(v) => Some(*v),
                    _ => None,
                })
        }

        fn histogram(&self, name: &str) -> Vec<f64> {
            self.find(MetricKind::Histogram, name)
                .flat_map(|(_, value)| match value {
                    DebugValue::Histogram(samples) => samples.iter().map(|v| v.0).collect(),
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    /// Run `scenario` on a current-thread runtime with a recorder local to this thread.
    fn capture(scenario: impl Future<Output = ()>) -> Captured {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || runtime.block_on(scenario));

        Captured(
            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .map(|(key, _, _, value)| (key, value))
                .collect(),
        )
    }

    fn channel_session() -> (Arc<dyn Session>, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSession::new(tx)), rx)
    }

    #[test]
    fn message_type_labels() {
        assert_eq!(MessageType::Direct.as_str(), "direct");
        assert_eq!(MessageType::Broadcast.as_str(), "broadcast");
    }

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            ACTIVE_CONNECTIONS,
            MESSAGES_TOTAL,
            SEND_FAILURES_TOTAL,
            CONNECTION_DURATION_SECONDS,
            BROADCAST_DURATION_SECONDS,
            BROADCAST_FANOUT,
            BROADCAST_MESSAGE_BYTES,
        ] {
            assert!(name.starts_with("websocket_"), "{name} should be prefixed");
        }
    }

    #[test]
    fn gauge_follows_register_and_deregister() {
        let captured = capture(async {
            let registry = ConnectionRegistry::new();
            let (first, _first_rx) = channel_session();
            let (second, _second_rx) = channel_session();

            let id = registry.register(first);
            registry.register(second);
            registry.deregister(&id);
            // Unknown id: no second duration sample
            registry.deregister(&id);
        });

        assert_eq!(captured.gauge(ACTIVE_CONNECTIONS), Some(1.0));
        assert_eq!(captured.histogram(CONNECTION_DURATION_SECONDS).len(), 1);
    }

    #[test]
    fn deregister_records_elapsed_connection_duration() {
        let captured = capture(async {
            let registry = ConnectionRegistry::new();
            let (session, _rx) = channel_session();

            let id = registry.register(session);
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.deregister(&id);
        });

        let durations = captured.histogram(CONNECTION_DURATION_SECONDS);
        assert_eq!(durations.len(), 1);
        assert!(durations[0] >= 0.02, "duration {} below elapsed time", durations[0]);
    }

    #[test]
    fn messages_are_tagged_direct_or_broadcast() {
        let message = "notification";
        let captured = capture(async move {
            let registry = ConnectionRegistry::new();
            let (session, _rx) = channel_session();

            let id = registry.register(session);
            registry.send_direct(&id, "one").await.unwrap();
            registry.send_direct(&id, "two").await.unwrap();
            registry.broadcast(message).await;
        });

        assert_eq!(captured.counter(MESSAGES_TOTAL, MessageType::Direct), Some(2));
        assert_eq!(captured.counter(MESSAGES_TOTAL, MessageType::Broadcast), Some(1));
        assert_eq!(captured.counter(SEND_FAILURES_TOTAL, MessageType::Broadcast), None);
        assert_eq!(captured.histogram(BROADCAST_FANOUT), vec![1.0]);
        assert_eq!(
            captured.histogram(BROADCAST_MESSAGE_BYTES),
            vec![message.len() as f64]
        );
        assert_eq!(captured.histogram(BROADCAST_DURATION_SECONDS).len(), 1);
    }

    #[test]
    fn failed_sends_are_counted_and_drop_the_gauge() {
        let captured = capture(async {
            let registry = ConnectionRegistry::new();
            let (direct, direct_rx) = channel_session();
            let (broadcast, broadcast_rx) = channel_session();
            drop(direct_rx);
            drop(broadcast_rx);

            let direct_id = registry.register(direct);
            assert!(registry.send_direct(&direct_id, "lost").await.is_err());
            registry.register(broadcast);
            registry.broadcast("lost").await;
        });

        assert_eq!(captured.counter(SEND_FAILURES_TOTAL, MessageType::Direct), Some(1));
        assert_eq!(captured.counter(SEND_FAILURES_TOTAL, MessageType::Broadcast), Some(1));
        assert_eq!(captured.gauge(ACTIVE_CONNECTIONS), Some(0.0));
        assert_eq!(captured.histogram(BROADCAST_FANOUT), vec![0.0]);
        assert_eq!(captured.histogram(CONNECTION_DURATION_SECONDS).len(), 2);
    }
}
