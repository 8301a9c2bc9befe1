use crate::services::{
    metadata_store::MetadataError,
    upload_service::{ResolveError, UploadError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// HTTP-facing error. The message is always generic; the underlying cause
/// is logged where the conversion happens and never sent to the client.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::MissingFile => AppError::bad_request("No file uploaded."),
            UploadError::InvalidBody(reason) => {
                warn!("rejecting malformed upload: {}", reason);
                AppError::bad_request("Malformed upload.")
            }
            UploadError::TooLarge => {
                warn!("rejecting upload over the body limit");
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "Upload too large.")
            }
            other => {
                error!("Upload process failed: {}", other);
                AppError::internal("Upload failed.")
            }
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::RecordNotFound(_) => AppError::not_found("File record not found."),
            ResolveError::ObjectMissing(key) => {
                warn!("record points at missing object {}", key);
                AppError::not_found("File record not found.")
            }
            other => {
                error!("Download URL generation failed: {}", other);
                AppError::internal("Internal server error during download generation.")
            }
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        error!("Metadata lookup failed: {}", err);
        AppError::internal("Internal server error.")
    }
}
