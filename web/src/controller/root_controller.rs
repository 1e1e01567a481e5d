use axum::Json;
use serde_json::{json, Value};

/// GET a greeting, useful as a liveness probe that touches nothing else
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Greeting")
    )
)]
pub async fn index() -> Json<Value> {
    Json(json!({ "message": "hello" }))
}
