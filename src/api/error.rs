use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::model::AimpointError;

/// Rejections raised before a component runs
///
/// Component failures are not errors here: they travel as an
/// `InvocationReport` with `status = false`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("cannot decode request: {0}")]
    InvalidPayload(String),
    #[error("expected application/json, got {0}")]
    UnsupportedMediaType(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    MalformedAimpoint(#[from] AimpointError),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        use ApiError::*;
        match self {
            InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            UnsupportedMediaType(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE"),
            PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            MalformedAimpoint(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MALFORMED_AIMPOINT"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = self.to_string();
        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}
