//! Converts the shared domain error type into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use cx_domain::error::Error;

/// Wraps [`cx_domain::error::Error`] so handlers can `?`-propagate it and
/// have axum turn it into a JSON error body with the right status code.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
