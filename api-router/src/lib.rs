use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    chat::chat_stream,
    context::assemble_context,
    monitor::monitor_status,
    papers::{paper_from_url, upload_paper},
    passage::mind_hack,
    probes::{live, ready},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/monitor", get(monitor_status));

    let library = Router::new()
        .route(
            "/papers",
            post(upload_paper).layer(DefaultBodyLimit::max(
                app_state.config.ingest_max_body_bytes,
            )),
        )
        .route("/papers/url", post(paper_from_url))
        .route("/context", post(assemble_context))
        .route("/chat", post(chat_stream))
        .route("/mind_hack", post(mind_hack));

    probes.merge(library)
}
