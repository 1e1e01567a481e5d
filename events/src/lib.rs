//! Change-notification contracts for the live data service.
//!
//! This crate defines the minimal pull interface that the dispatch pipeline
//! consumes from an upstream change-event source (e.g. PostgreSQL
//! `LISTEN/NOTIFY`). It has no dependencies on the other internal crates so
//! that both the `service` crate (which implements the PostgreSQL bridge) and
//! the `ws` crate (which consumes it) can depend on it without cycles.
//!
//! # Architecture
//!
//! - **Notification**: one discrete change event, a channel name plus an opaque payload
//! - **NotificationSource**: opens a live subscription to a named channel
//! - **Subscription**: yields notifications in arrival order, suspending until one is available

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::Error;

/// A single change event emitted by the upstream data source.
///
/// The payload is passed through verbatim; nothing in the pipeline interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Logical event stream the notification was published on.
    pub channel: String,
    /// Opaque payload as emitted by the source.
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A live subscription to one notification channel.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next notification in arrival order.
    ///
    /// Returns `Ok(None)` once the subscription has ended and will produce no
    /// further notifications. An `Err` means the subscription failed and
    /// cannot be resumed; callers must subscribe again.
    async fn next(&mut self) -> Result<Option<Notification>, Error>;
}

/// Opens subscriptions on an upstream change-event source.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, Error>;
}
