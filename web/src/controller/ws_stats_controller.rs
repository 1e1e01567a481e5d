use crate::AppState;
use axum::extract::State;
use axum::Json;
use ws::ConnectionStats;

/// GET a snapshot of all live WebSocket connections
#[utoipa::path(
    get,
    path = "/ws/stats",
    responses(
        (status = 200, description = "Active connections with per-connection message counts and durations", body = ConnectionStats)
    )
)]
pub async fn stats(State(app_state): State<AppState>) -> Json<ConnectionStats> {
    Json(app_state.registry.stats())
}
