//! Realtime WebSocket fanout of database change notifications.
//!
//! This crate owns the set of live client sessions and the pipeline that turns
//! upstream change notifications into broadcasts to every one of them.
//!
//! # Architecture
//!
//! - **Snapshot-before-iterate registry**: sessions live in a single map behind
//!   one lock. Whole-set operations copy out a snapshot first and never hold the
//!   lock across a send, so sessions joining or leaving mid-broadcast cannot
//!   corrupt the iteration.
//! - **Per-session failure isolation**: a failed or timed-out send only ever
//!   drops that session; it never aborts a broadcast or the dispatch loop.
//! - **Ephemeral messages**: nothing is persisted or replayed. A session that is
//!   not connected when a notification arrives simply misses it.
//! - **Supervised dispatch**: the dispatch loop is restarted with exponential
//!   backoff when the upstream subscription fails, and exposes its run state.
//!
//! # Message Flow
//!
//! 1. The web layer upgrades a request to a WebSocket and wraps it in a `Session`
//! 2. The session is registered with `ConnectionRegistry::register`
//! 3. The `Dispatcher` subscribes to the configured notification channel
//! 4. Each notification becomes a `database_notification` message
//! 5. `ConnectionRegistry::broadcast` fans it out to a snapshot of all sessions
//! 6. Sessions whose delivery failed are deregistered after the pass
//!
//! # Modules
//!
//! - `connection`: `ConnectionId`, the `Session` trait and an in-process channel session
//! - `registry`: `ConnectionRegistry` with direct send, broadcast and stats
//! - `dispatch`: `DispatchLoop`, the supervising `Dispatcher` and its `RetryPolicy`
//! - `message`: wire message definitions
//! - `metrics`: instrumentation hooks
//! - `error`: error kinds for sends and the notification bridge

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;

pub use connection::{ChannelSession, ConnectionId, Session};
pub use dispatch::{DispatchHandle, DispatchLoop, DispatchState, DispatchStatus, Dispatcher, RetryPolicy};
pub use registry::{BroadcastReport, ConnectionRegistry, ConnectionStats};
