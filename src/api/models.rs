//! Request and response bodies of the event surface.
//!
//! Bus payloads themselves (`OutcomeMessage`, `FetchOrder`) live in
//! [`crate::model`]; this module only holds what is specific to HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::observability::MetricsSnapshot;

/// Header carrying the Outcome Bus send timestamp in epoch millis
pub const SENT_TIMESTAMP_HEADER: &str = "X-Sent-Timestamp";

/// Query accepted by the tick endpoints
#[derive(Debug, Default, Deserialize)]
pub struct TickParams {
    /// Logical tick time; defaults to the time the request arrived
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: BTreeMap<&'static str, &'static str>,
    pub version: &'static str,
    pub metrics: MetricsSnapshot,
}
