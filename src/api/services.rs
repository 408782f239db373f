use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use std::collections::BTreeMap;

use super::{
    error::ApiError,
    models::{HealthResponse, TickParams},
    state::AppState,
    utils::{read_body, require_json, sent_timestamp},
};
use crate::model::{FetchOrder, OutcomeMessage};
use crate::observability::InvocationReport;

/// Emit the audit record, count it, and answer with it; a false report
/// answers `on_failure`.
fn respond(
    state: &AppState,
    report: InvocationReport,
    on_failure: StatusCode,
) -> (StatusCode, Json<InvocationReport>) {
    report.emit();
    state.metrics.observe(&report);
    let status = if report.status {
        StatusCode::OK
    } else {
        on_failure
    };
    (status, Json(report))
}

/// Outcome Bus consumer (POST /outcomes)
///
/// Body is `{"aimpoint": {...}, "isCollecting": bool}`. The record time is
/// the `X-Sent-Timestamp` header when present, else the receipt time.
pub async fn record_outcome(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let received_ms = Utc::now().timestamp_millis();
    require_json(&headers)?;
    let sent_ms = sent_timestamp(&headers, received_ms)?;
    let bytes = read_body(body, state.config.server.max_payload_bytes).await?;

    let message: OutcomeMessage = serde_json::from_slice(&bytes)?;
    message.aimpoint.validate()?;

    let report = state
        .history
        .run(&message, sent_ms, state.config.deadlines.record())
        .await;
    // 500 makes the at-least-once bus redeliver; the write is idempotent
    Ok(respond(&state, report, StatusCode::INTERNAL_SERVER_ERROR))
}

/// Fetch-order consumer (POST /dispatch)
///
/// One order in, at most one worker invocation out. The order is consumed
/// whatever happens: failures and refusals answer 200 with a false report,
/// so the bus never redelivers.
pub async fn dispatch_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    require_json(&headers)?;
    let bytes = read_body(body, state.config.server.max_payload_bytes).await?;
    let order = FetchOrder::from_json(&bytes)?;

    let report = state.dispatcher.run(&order).await;
    Ok(respond(&state, report, StatusCode::OK))
}

/// Timer trigger for the scheduler (POST /ticks/monitor)
pub async fn tick_monitor(
    State(state): State<AppState>,
    Query(params): Query<TickParams>,
) -> impl IntoResponse {
    let now = params.now.unwrap_or_else(Utc::now);
    let report = state
        .monitor
        .run(now, state.config.deadlines.monitor())
        .await;
    respond(&state, report, StatusCode::INTERNAL_SERVER_ERROR)
}

/// Timer trigger for the disabler (POST /ticks/disabler)
pub async fn tick_disabler(
    State(state): State<AppState>,
    Query(params): Query<TickParams>,
) -> impl IntoResponse {
    let now = params.now.unwrap_or_else(Utc::now);
    let report = state
        .disabler
        .run(now, state.config.deadlines.lifecycle())
        .await;
    respond(&state, report, StatusCode::INTERNAL_SERVER_ERROR)
}

/// Timer trigger for the enabler (POST /ticks/enabler)
pub async fn tick_enabler(
    State(state): State<AppState>,
    Query(params): Query<TickParams>,
) -> impl IntoResponse {
    let now = params.now.unwrap_or_else(Utc::now);
    let report = state
        .enabler
        .run(now, state.config.deadlines.lifecycle())
        .await;
    respond(&state, report, StatusCode::INTERNAL_SERVER_ERROR)
}

/// Health check endpoint (GET /health)
///
/// 503 when the local queue is configured and unreadable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();
    components.insert("api", "healthy");

    if let Some(queue) = &state.queue {
        let queue_status = match queue.health_check() {
            Ok(()) => "healthy",
            Err(_) => "unhealthy",
        };
        components.insert("queue", queue_status);
    }

    let all_healthy = components.values().all(|status| *status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" },
        components,
        version: env!("CARGO_PKG_VERSION"),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}
