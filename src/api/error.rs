use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compose::{ComposeError, MediaKind};

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Please provide both 'audio' and 'image' files.")]
    MissingParts,

    #[error(
        "Unsupported {kind} format. Allowed formats: {allowed}",
        kind = .0,
        allowed = .0.allowed_extensions().join(", ")
    )]
    UnsupportedFormat(MediaKind),

    #[error("Failed to read multipart: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to prepare scratch files: {0}")]
    Scratch(#[from] std::io::Error),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingParts | ApiError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(error) => error.status(),
            ApiError::Scratch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Compose(ComposeError::InputDecode { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Compose(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
