//! HTTP and WebSocket surface of the live data service.
//!
//! The web layer only accepts connections and exposes read models. Session
//! bookkeeping and notification fanout live in the `ws` crate.

use log::*;
use metrics_exporter_prometheus::PrometheusHandle;
use service::config::Config;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use ws::{ConnectionRegistry, DispatchStatus};

mod controller;
mod router;
mod socket;

pub use router::define_routes;

/// State shared by every route.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatch_status: DispatchStatus,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ConnectionRegistry>,
        dispatch_status: DispatchStatus,
    ) -> Self {
        Self {
            config,
            registry,
            dispatch_status,
            metrics_handle: None,
        }
    }

    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn init_server(
    app_state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let bind_address = app_state.config.bind_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Server starting... listening for connections on http://{bind_address}");

    let router = define_routes(app_state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
