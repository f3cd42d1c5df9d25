use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::error::AppError;
use ingestion_pipeline::PaperUpload;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct PaperUploadParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub folder_id: Option<String>,
}

pub async fn upload_paper(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<PaperUploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload.pdf".to_string());
    let bytes = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(AppError::from)?;
    if bytes.is_empty() {
        return Err(ApiError::ValidationError("Uploaded file is empty".to_string()));
    }

    info!(
        %filename,
        bytes = bytes.len(),
        folder_id = ?input.folder_id,
        "Received paper upload"
    );

    let upload = PaperUpload::new(bytes, filename).in_folder(input.folder_id);
    let processed = state.papers.process(upload).await?;

    Ok((StatusCode::CREATED, Json(processed)))
}

#[derive(Debug, Deserialize)]
pub struct PaperUrlRequest {
    pub url: String,
    #[serde(default)]
    pub folder_id: Option<String>,
}

pub async fn paper_from_url(
    State(state): State<ApiState>,
    Json(request): Json<PaperUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(url = %request.url, folder_id = ?request.folder_id, "Received paper link");

    let processed = state
        .papers
        .process_url(&request.url, request.folder_id)
        .await?;

    Ok((StatusCode::CREATED, Json(processed)))
}
