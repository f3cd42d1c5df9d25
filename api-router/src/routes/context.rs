use axum::{extract::State, Json};
use retrieval_pipeline::{AssembledContext, ContextRequest};

use crate::{api_state::ApiState, error::ApiError};

/// The context a chat answer would be grounded in, without generating one.
pub async fn assemble_context(
    State(state): State<ApiState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<AssembledContext>, ApiError> {
    let assembled = state.assembler.assemble(&request, None).await?;
    Ok(Json(assembled))
}
