//! Audit records and process counters
//!
//! Every invocation (tick, sweep, dispatch, record) ends with exactly one
//! `InvocationReport::emit()`. Reports log on the `audit` target so they can
//! be routed separately with `RUST_LOG=audit=info`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// The `{status: bool}` result of one invocation plus its audit fields
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    pub component: &'static str,
    pub status: bool,
    pub severity: Severity,
    pub message: String,
    pub counts: BTreeMap<&'static str, u64>,
}

impl InvocationReport {
    pub fn ok(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            status: true,
            severity: Severity::Info,
            message: message.into(),
            counts: BTreeMap::new(),
        }
    }

    /// Some items in the batch failed; the invocation itself completed
    pub fn partial(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: false,
            severity: Severity::Error,
            ..Self::ok(component, message)
        }
    }

    /// The invocation could not run to completion
    pub fn critical(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: false,
            severity: Severity::Critical,
            ..Self::ok(component, message)
        }
    }

    pub fn with_count(mut self, name: &'static str, value: u64) -> Self {
        self.counts.insert(name, value);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Log the report on the `audit` target at its severity
    pub fn emit(&self) {
        let counts = serde_json::to_string(&self.counts).unwrap_or_default();
        match self.severity {
            Severity::Info => info!(
                target: "audit",
                component = self.component,
                status = self.status,
                severity = %self.severity,
                counts = %counts,
                "{}", self.message
            ),
            Severity::Warning => warn!(
                target: "audit",
                component = self.component,
                status = self.status,
                severity = %self.severity,
                counts = %counts,
                "{}", self.message
            ),
            Severity::Error | Severity::Critical => error!(
                target: "audit",
                component = self.component,
                status = self.status,
                severity = %self.severity,
                counts = %counts,
                "{}", self.message
            ),
        }
    }
}

/// Process-wide counters, shared by the daemon and the event surface
#[derive(Debug, Default)]
pub struct Metrics {
    orders_enqueued: AtomicU64,
    orders_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    outcomes_recorded: AtomicU64,
    demotions: AtomicU64,
    promotions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders_enqueued(&self, n: u64) {
        self.orders_enqueued.fetch_add(n, Ordering::Relaxed);
        tracing::debug!(counter = "orders_enqueued", n, "Metric incremented");
    }

    pub fn order_dispatched(&self) {
        self.orders_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "orders_dispatched", "Metric incremented");
    }

    pub fn dispatch_failed(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "dispatch_failures", "Metric incremented");
    }

    pub fn outcome_recorded(&self) {
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "outcomes_recorded", "Metric incremented");
    }

    pub fn demoted(&self, n: u64) {
        self.demotions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn promoted(&self, n: u64) {
        self.promotions.fetch_add(n, Ordering::Relaxed);
    }

    /// Fold a finished invocation into the counters
    pub fn observe(&self, report: &InvocationReport) {
        let count = |name: &str| report.counts.get(name).copied().unwrap_or(0);
        match report.component {
            "monitor" => self.orders_enqueued(count("enqueued")),
            "disabler" => self.demoted(count("moved")),
            "enabler" => self.promoted(count("moved")),
            "dispatcher" if report.status => self.order_dispatched(),
            "dispatcher" => self.dispatch_failed(),
            "history" if report.status => self.outcome_recorded(),
            _ => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_enqueued: self.orders_enqueued.load(Ordering::Relaxed),
            orders_dispatched: self.orders_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            outcomes_recorded: self.outcomes_recorded.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub orders_enqueued: u64,
    pub orders_dispatched: u64,
    pub dispatch_failures: u64,
    pub outcomes_recorded: u64,
    pub demotions: u64,
    pub promotions: u64,
}
