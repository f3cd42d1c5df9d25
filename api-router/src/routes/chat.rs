use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use retrieval_pipeline::ChatRequest;
use tracing::info;

use crate::api_state::ApiState;

/// Streams the answer as server-sent events, one JSON `ChatEvent` per frame.
pub async fn chat_stream(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!(
        query_chars = request.query.chars().count(),
        history = request.history.len(),
        paper_ids = request.scope.paper_ids.len(),
        folder_id = ?request.scope.folder_id,
        deep_search = request.deep_search,
        "Received chat request"
    );

    let events = state
        .chat
        .answer(request)
        .map(|event| Event::default().json_data(event));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
