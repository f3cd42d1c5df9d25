use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::utils::config::get_config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    info!(
        embedding_backend = ?config.embedding_backend,
        mock_mode = !config.has_llm_credential(),
        web_search = config.web_search_enabled,
        "Configuration loaded"
    );

    // Opens the metadata store and the vector index; a corrupted index that
    // could not be reset aborts startup here.
    let api_state = ApiState::new(&config).await?;

    let app = app_router(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app_router(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state })
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
