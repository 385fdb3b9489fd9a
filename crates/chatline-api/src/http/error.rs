//! Application error type mapping to HTTP status codes and envelope format.
//!
//! Provider and storage details are logged, never returned to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use chatline_types::error::ChatError;

use super::response::ApiResponse;

/// Client-safe text for a failed generation.
pub const GENERATION_FAILED_MESSAGE: &str = "The assistant could not generate a reply. Please try again.";

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Chat(ChatError),
    /// The request conflicts with server configuration.
    Conflict(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Chat(ChatError::InvalidRequest(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Chat(ChatError::StorageUnavailable(detail)) => {
                warn!(error = %detail, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_UNAVAILABLE",
                    "Message storage is temporarily unavailable".to_string(),
                )
            }
            AppError::Chat(ChatError::GenerationFailed(detail)) => {
                error!(error = %detail, "Generation failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "GENERATION_FAILED",
                    GENERATION_FAILED_MESSAGE.to_string(),
                )
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Chat(other) => {
                error!(error = %other, "Unhandled chat error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        ApiResponse::error(status, code, &message).into_response()
    }
}
