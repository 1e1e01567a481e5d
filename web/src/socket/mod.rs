//! WebSocket endpoint for the web layer.
//!
//! This module contains the Axum upgrade handler and the `Session` adapter for
//! axum sockets. The registry and dispatch pipeline live in the `ws` crate.

pub(crate) mod handler;
mod session;
