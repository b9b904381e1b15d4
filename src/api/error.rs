use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::identifier::IdentifierError;
use crate::mirror::MirrorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("invalid mirroring triple: {0}")]
    InvalidMirror(#[from] MirrorError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidMirror(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidMirror(_) => "INVALID_MIRROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
