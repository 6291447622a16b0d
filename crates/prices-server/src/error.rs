//! Server-level error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::db::StoreError;

/// Result type alias for server operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Store(StoreError::Conflict(ref message)) => {
                (StatusCode::CONFLICT, "CONFLICT", message.clone())
            },
            AppError::Store(ref e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", "A storage error occurred".to_string())
            },
            AppError::Unavailable(ref message) => {
                tracing::warn!("Service unavailable: {}", message);
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message.clone())
            },
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
