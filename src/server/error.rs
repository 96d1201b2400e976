//! HTTP mapping for service errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::error::DjqError;

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
    category: &'static str,
}

impl DjqError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Backend { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DjqError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("{}: {}", self.category(), self);
        }
        let body = ErrorResponse {
            message: self.to_string(),
            category: self.category(),
        };
        (status, Json(body)).into_response()
    }
}
