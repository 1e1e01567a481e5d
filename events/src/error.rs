//! Error types for notification sources.
//!
//! Follows the same pattern as the other crates in the workspace: a root
//! `Error` struct holding an `error_kind` and an optional `source`.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Connecting to the source or issuing the subscription failed.
    Connect,
    /// The subscription was established but receiving from it failed.
    Receive,
}

impl Error {
    pub fn connect(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: Some(source.into()),
            error_kind: ErrorKind::Connect,
        }
    }

    pub fn receive(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: Some(source.into()),
            error_kind: ErrorKind::Receive,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Notification source error ({:?}): {source}", self.error_kind),
            None => write!(f, "Notification source error ({:?})", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
