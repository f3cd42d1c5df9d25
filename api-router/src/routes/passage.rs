use axum::{extract::State, Json};
use retrieval_pipeline::{PassageRequest, PassageResult};

use crate::{api_state::ApiState, error::ApiError};

/// Translates or explains a passage selected in the reader.
pub async fn mind_hack(
    State(state): State<ApiState>,
    Json(request): Json<PassageRequest>,
) -> Result<Json<PassageResult>, ApiError> {
    let result = state.passages.process(&request).await?;
    Ok(Json(result))
}
