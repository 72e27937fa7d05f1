//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any [`ConversionError`]
//! converts with `?` and renders as `{ "error": ..., "code": ... }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::conversion::ConversionError;

/// Wrapper so we can implement `IntoResponse` for the conversion error type.
#[derive(Debug)]
pub struct AppError(pub ConversionError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ConversionError::PathRequired
            | ConversionError::InvalidPath(_)
            | ConversionError::DestinationIsSource(_) => StatusCode::BAD_REQUEST,
            ConversionError::PathDoesNotExist(_) => StatusCode::NOT_FOUND,
            ConversionError::ConversionFailed(_)
            | ConversionError::StaleJobEvent(_)
            | ConversionError::Store(_)
            | ConversionError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(e: ConversionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.0,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
