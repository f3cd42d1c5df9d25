use axum::{extract::State, response::IntoResponse, Json};
use common::utils::{monitor::MonitorSnapshot, rag_runtime::RagStatus};
use serde::Serialize;

use crate::api_state::ApiState;

#[derive(Debug, Serialize)]
struct MonitorResponse {
    #[serde(flatten)]
    monitor: MonitorSnapshot,
    rag: RagStatus,
    mock_mode: bool,
}

/// Current assistant state, last latencies and RAG availability.
pub async fn monitor_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(MonitorResponse {
        monitor: state.monitor.snapshot(),
        rag: state.runtime.status(),
        mock_mode: state.chat.is_mock(),
    })
}
