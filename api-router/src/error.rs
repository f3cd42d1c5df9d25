use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Unavailable(msg) => Self::Unavailable(msg),
            AppError::IndexCorrupted(_) => {
                tracing::error!("Vector store unusable: {:?}", err);
                Self::Unavailable("The search index is unavailable".to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::AppError;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("paper 7".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "paper 7"));

        let validation = AppError::Validation("Query must not be empty".to_string());
        let api_error = ApiError::from(validation);
        assert!(
            matches!(api_error, ApiError::ValidationError(msg) if msg == "Query must not be empty")
        );

        let unavailable = AppError::Unavailable("no embedding model".to_string());
        let api_error = ApiError::from(unavailable);
        assert!(matches!(api_error, ApiError::Unavailable(msg) if msg == "no embedding model"));

        let internal_error = AppError::Io(std::io::Error::other("disk error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_corrupted_index_does_not_leak_details() {
        let api_error = ApiError::from(AppError::IndexCorrupted("/data/vector_store_v2".into()));
        assert!(matches!(&api_error, ApiError::Unavailable(msg) if !msg.contains("/data")));
        assert_status_code(api_error, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(ApiError::NotFound("not found".to_string()), StatusCode::NOT_FOUND);
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unavailable("warming up".to_string()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
