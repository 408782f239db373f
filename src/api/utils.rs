//! Header and body helpers shared by the handlers

use axum::body::Body;
use axum::http::{HeaderMap, header};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};

use super::models::SENT_TIMESTAMP_HEADER;
use crate::api::error::ApiError;

/// Require `Content-Type: application/json`, parameters allowed
pub fn require_json(headers: &HeaderMap) -> Result<mime::Mime, ApiError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::UnsupportedMediaType("missing Content-Type".into()))?;

    let media_type: mime::Mime = raw
        .parse()
        .map_err(|_| ApiError::UnsupportedMediaType(raw.to_string()))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::UnsupportedMediaType(media_type.essence_str().to_string()));
    }
    Ok(media_type)
}

/// Collect at most `limit` bytes of request body
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|err| {
            if err.is::<http_body_util::LengthLimitError>() {
                ApiError::PayloadTooLarge(limit)
            } else {
                ApiError::InvalidPayload(err.to_string())
            }
        })
}

/// The bus send time in epoch millis, or `received_ms` when the header is absent
pub fn sent_timestamp(headers: &HeaderMap, received_ms: i64) -> Result<i64, ApiError> {
    let Some(value) = headers.get(SENT_TIMESTAMP_HEADER) else {
        return Ok(received_ms);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|ms| *ms >= 0)
        .ok_or_else(|| {
            ApiError::InvalidPayload(format!("{SENT_TIMESTAMP_HEADER} must be epoch milliseconds"))
        })
}
