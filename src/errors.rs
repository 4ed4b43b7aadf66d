use crate::services::image_service::ImageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

pub const MSG_NO_FILE: &str = "No file uploaded";
pub const MSG_NOT_FOUND: &str = "Image not found";
pub const MSG_SERVER_ERROR: &str = "Server Error";
pub const MSG_UPLOAD_FAILED: &str = "Failed to upload image to storage";
pub const MSG_DELETE_OLD_FAILED: &str = "Failed to delete old image from storage";
pub const MSG_UPLOAD_NEW_FAILED: &str = "Failed to upload new image";
pub const MSG_DELETE_FAILED: &str = "Failed to delete image from storage";
pub const MSG_DOWNLOAD_FAILED: &str = "Error downloading image";

/// An HTTP status plus the message sent to the client as `{"message": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
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

    /// Shortcut for 400 Bad Request
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
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::MissingFile => AppError::bad_request(MSG_NO_FILE),
            ImageError::NotFound(_) => AppError::not_found(MSG_NOT_FOUND),
            other => {
                tracing::error!(error = %other, "image operation failed");
                let message = match other {
                    ImageError::UploadFailed(_) => MSG_UPLOAD_FAILED,
                    ImageError::DeleteOldFailed(_) => MSG_DELETE_OLD_FAILED,
                    ImageError::UploadNewFailed(_) => MSG_UPLOAD_NEW_FAILED,
                    ImageError::DeleteFailed(_) => MSG_DELETE_FAILED,
                    ImageError::DownloadFailed(_) => MSG_DOWNLOAD_FAILED,
                    _ => MSG_SERVER_ERROR,
                };
                AppError::internal(message)
            }
        }
    }
}
