//! Shared HTTP error type for the dashboard and ingest surfaces.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::domain::interaction::ValidationError;
use crate::domain::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound(&'static str),
    Conflict(&'static str),
    Unauthorized,
    Storage(StorageError),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Storage(StorageError::Serialization(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            // A read-miss for an id is reported as 500 per the spec's
            // binding error-propagation rule, not 404.
            ApiError::NotFound(resource) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{resource} not found"))
            }
            // Dedup violations are reported as 400 per the dashboard dedup
            // contract (a duplicate endpoint tuple is a bad request, not a
            // conflicting resource state).
            ApiError::Conflict(resource) => (StatusCode::BAD_REQUEST, format!("{resource} already exists")),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid api key".to_string()),
            ApiError::Storage(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
