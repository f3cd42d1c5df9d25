use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Liveness: the process is up and serving.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness: 200 when the metadata store answers, else 503. A degraded
/// RAG runtime is reported but does not fail the probe.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let rag = if state.runtime.is_ready() {
        "ok"
    } else {
        "degraded"
    };

    match state.db.client.query("RETURN true").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "rag": rag }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail", "rag": rag },
                "reason": e.to_string()
            })),
        ),
    }
}
