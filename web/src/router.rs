use crate::controller::{
    health_check_controller, metrics_controller, root_controller, ws_stats_controller,
};
use crate::socket::handler::ws_handler;
use crate::AppState;
use axum::{http::HeaderValue, routing::get, Router};
use log::*;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Live Data API"
        ),
        paths(
            root_controller::index,
            health_check_controller::health_check,
            ws_stats_controller::stats,
            metrics_controller::render,
        ),
        components(
            schemas(
                ws::ConnectionStats,
                ws::registry::ConnectionStat,
                ws::DispatchState,
                health_check_controller::HealthStatus,
            )
        ),
        tags(
            (name = "live_data_rs", description = "Realtime database notifications over WebSockets")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .merge(root_routes())
        .merge(health_routes(app_state.clone()))
        .merge(ws_routes(app_state.clone()))
        .merge(metrics_routes(app_state))
        .merge(RapiDoc::with_openapi("/api-docs/openapi2.json", ApiDoc::openapi()).path("/rapidoc"))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn root_routes() -> Router {
    Router::new().route("/", get(root_controller::index))
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/stats", get(ws_stats_controller::stats))
        .with_state(app_state)
}

fn metrics_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_controller::render))
        .with_state(app_state)
}
