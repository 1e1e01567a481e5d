//! Error types for the `ws` crate.
//!
//! Follows the workspace pattern of a root `Error` struct holding an
//! `error_kind` tree and an optional `source` for chaining.

use std::error::Error as StdError;
use std::fmt;

use events::error::ErrorKind as SourceErrorKind;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the realtime pipeline.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Send(SendErrorKind),
    Bridge(BridgeErrorKind),
    Serialization,
}

/// Errors delivering a message to a single session. Always local to that session.
#[derive(Debug, PartialEq)]
pub enum SendErrorKind {
    /// The peer has gone away.
    Closed,
    /// The send did not complete within the configured timeout.
    Timeout,
    /// The underlying transport reported a write error.
    Transport,
}

/// Errors from the upstream notification subscription.
#[derive(Debug, PartialEq)]
pub enum BridgeErrorKind {
    Subscribe,
    Receive,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Send(kind) => write!(f, "Send error: {:?}", kind)?,
            ErrorKind::Bridge(kind) => write!(f, "Notification bridge error: {:?}", kind)?,
            ErrorKind::Serialization => write!(f, "Serialization error")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// Translate errors from the notification source layer into bridge errors.
impl From<events::Error> for Error {
    fn from(err: events::Error) -> Self {
        let kind = match err.error_kind {
            SourceErrorKind::Connect => BridgeErrorKind::Subscribe,
            SourceErrorKind::Receive => BridgeErrorKind::Receive,
        };
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Bridge(kind),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Serialization,
        }
    }
}

/// Helper function to create send errors.
pub fn send_error(kind: SendErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Send(kind),
    }
}
