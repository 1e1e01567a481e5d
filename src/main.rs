use log::{error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use ws::{ConnectionRegistry, Dispatcher, RetryPolicy};

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!("Starting live data service [{}]...", config.runtime_env());
    if config.is_production() && config.allowed_origins.is_empty() {
        warn!("No allowed origins configured; cross-origin browser clients will be rejected");
    }

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed, /metrics is disabled: {e}");
            None
        }
    };

    let db = match service::init_database(&config).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(ConnectionRegistry::with_send_timeout(
        config.ws_send_timeout(),
    ));
    info!("WebSocket send timeout: {:?}", registry.send_timeout());
    let source = Arc::new(service::notification_source(&db));
    let policy = RetryPolicy::new(config.listener_max_retries)
        .with_delays(config.listener_retry_base(), config.listener_retry_max());

    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        source,
        registry.clone(),
        config.notify_channel(),
        policy,
    )
    .spawn(cancel.clone());

    let mut app_state = web::AppState::new(config, registry, dispatcher.status());
    if let Some(handle) = metrics_handle {
        app_state = app_state.with_metrics_handle(handle);
    }

    let shutdown = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
        cancel.cancel();
    };

    if let Err(e) = web::init_server(app_state, shutdown).await {
        error!("Server stopped with error: {e}");
    }

    dispatcher.shutdown().await;

    if let Err(e) = db.close().await {
        warn!("Failed to close database pool: {e}");
    }
    info!("Live data service stopped");
}
