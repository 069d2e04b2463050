use std::path::PathBuf;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const MISSING_FIELDS: &str = "Missing numbers or message";
pub const NO_VALID_NUMBERS: &str = "No valid phone numbers found";
pub const INVALID_FORM: &str = "Invalid multipart form data";
pub const INVALID_JSON: &str = "Invalid JSON body";
pub const SEND_FAILED: &str = "Failed to send messages";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad or missing input the caller can fix.
    #[error("{0}")]
    Validation(&'static str),

    #[error("malformed multipart body: {0}")]
    InvalidForm(String),

    #[error("malformed json body: {0}")]
    InvalidJson(String),

    #[error("failed to read uploaded media {}: {source}", .path.display())]
    MediaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self::InvalidForm(err.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(err: MultipartRejection) -> Self {
        Self::InvalidForm(err.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        Self::InvalidJson(err.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidForm(_) | Self::InvalidJson(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MediaRead { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Validation(msg) => *msg,
            Self::InvalidForm(detail) => {
                log::warn!("Rejected form: {}", detail);
                INVALID_FORM
            }
            Self::InvalidJson(detail) => {
                log::warn!("Rejected json body: {}", detail);
                INVALID_JSON
            }
            Self::MediaRead { .. } | Self::Internal(_) => {
                log::error!("Error sending messages: {:#}", self);
                SEND_FAILED
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        assert_eq!(AppError::Validation(MISSING_FIELDS).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidForm("eof".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidJson("eof".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn media_and_internal_errors_map_to_server_error() {
        let media = AppError::MediaRead {
            path: PathBuf::from("uploads/x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(media.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(media.to_string().contains("uploads/x"));

        let internal = AppError::from(anyhow::anyhow!("boom"));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
