//! HTTP error bodies

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quill_core::QuillError;
use serde_json::{json, Value};
use tracing::error;

/// A `QuillError` rendered as `{ "error": { code, message, details? } }`
#[derive(Debug)]
pub struct ApiError(pub QuillError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn body(&self) -> Value {
        let mut error = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        if let Some(details) = self.0.details() {
            error["details"] = details;
        }
        json!({ "error": error })
    }
}

impl From<QuillError> for ApiError {
    fn from(err: QuillError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
