use crate::controller::ApiResponse;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use ws::DispatchState;

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct HealthStatus {
    status: String,
    dispatcher: DispatchState,
    active_connections: usize,
}

/// GET the health of the API and its notification dispatcher
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "API router is up and the notification dispatcher is running", body = HealthStatus),
        (status = 503, description = "The notification dispatcher has terminated", body = HealthStatus)
    )
)]
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    let dispatcher = app_state.dispatch_status.current();
    let (status_code, status) = match dispatcher {
        DispatchState::Terminated => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        _ => (StatusCode::OK, "healthy"),
    };

    let health = HealthStatus {
        status: status.to_string(),
        dispatcher,
        active_connections: app_state.registry.len(),
    };
    (
        status_code,
        Json(ApiResponse::new(status_code.into(), health)),
    )
}
