//! History log of collection attempts
//!
//! Every attempt leaves one zero-byte object whose key carries the target
//! stem, the UTC timestamp, the epoch millis and the outcome:
//!
//! ```text
//! status/<stem>/YYYYMMDDhhmmss_<epochMillis>_<success|failure>
//! ```
//!
//! Keys sort in time order, so "what happened since T" is a single
//! startAfter range scan. Writes are idempotent: the same tuple always maps
//! to the same key.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::model::{Aimpoint, OutcomeMessage};
use crate::observability::InvocationReport;
use crate::storage::keys::{self, Outcome, OutcomeKey};
use crate::storage::{StorageClient, StorageError};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("timestamp {0} ms is out of range")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

const COMPONENT: &str = "history";

/// What a lookback window says about a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No attempts recorded in the window
    NoEvidence,
    /// Every recorded attempt failed
    AllFailed,
    /// At least one attempt succeeded
    AnySucceeded,
}

/// Outcome records read from one lookback window
#[derive(Debug, Clone, Default)]
pub struct RecentHistory {
    pub keys: Vec<String>,
}

impl RecentHistory {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.count(Outcome::Failure)
    }

    pub fn successes(&self) -> usize {
        self.count(Outcome::Success)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.keys
            .iter()
            .filter(|k| record_name(k).contains(outcome.as_str()))
            .count()
    }

    pub fn verdict(&self) -> Verdict {
        if self.keys.is_empty() {
            Verdict::NoEvidence
        } else if self.successes() > 0 {
            Verdict::AnySucceeded
        } else if self.failures() == self.keys.len() {
            Verdict::AllFailed
        } else {
            // Keys that are neither: treat as evidence without a success
            Verdict::NoEvidence
        }
    }
}

/// Last key segment; the stem itself may contain anything
fn record_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Append-only outcome log in the Aimpoint Store bucket
#[derive(Clone)]
pub struct HistoryLog {
    storage: StorageClient,
}

impl HistoryLog {
    pub fn new(storage: StorageClient) -> Self {
        Self { storage }
    }

    /// Record one attempt; returns the key written
    pub async fn record(
        &self,
        aimpoint: &Aimpoint,
        is_collecting: bool,
        epoch_ms: i64,
    ) -> Result<String> {
        let outcome = Outcome::from_collecting(is_collecting);
        let key = OutcomeKey::new(aimpoint.file_stem(), epoch_ms, outcome)
            .to_key()
            .ok_or(HistoryError::InvalidTimestamp(epoch_ms))?;

        self.storage.put(&key, Bytes::new()).await?;

        debug!(
            device_id = %aimpoint.device_id,
            key = %key,
            outcome = outcome.as_str(),
            "Outcome recorded"
        );
        Ok(key)
    }

    /// Outcome keys for `stem` recorded after `now - look_back`
    pub async fn recent(
        &self,
        stem: &str,
        now: DateTime<Utc>,
        look_back: Duration,
    ) -> Result<RecentHistory> {
        let prefix = keys::status_prefix(stem);
        let cursor = keys::status_cursor(stem, now - look_back);
        let keys = self.storage.list_after(&prefix, &cursor).await?;
        Ok(RecentHistory { keys })
    }

    /// Consume one Outcome Bus message under `deadline`
    pub async fn run(
        &self,
        message: &OutcomeMessage,
        sent_ms: i64,
        deadline: std::time::Duration,
    ) -> InvocationReport {
        let device_id = &message.aimpoint.device_id;
        let recorded = tokio::time::timeout(
            deadline,
            self.record(&message.aimpoint, message.is_collecting, sent_ms),
        )
        .await;

        match recorded {
            Ok(Ok(key)) => InvocationReport::ok(COMPONENT, format!("recorded {key}"))
                .with_count("recorded", 1),
            Ok(Err(HistoryError::InvalidTimestamp(ms))) => {
                warn!(device_id = %device_id, sent_ms = ms, "Outcome timestamp out of range");
                InvocationReport::partial(COMPONENT, format!("timestamp {ms} ms is out of range"))
                    .with_count("recorded", 0)
            }
            Ok(Err(e)) => {
                error!(device_id = %device_id, error = %e, severity = "CRITICAL", "Outcome write failed");
                InvocationReport::critical(COMPONENT, format!("record failed: {e}"))
            }
            Err(_) => {
                error!(device_id = %device_id, ?deadline, severity = "CRITICAL", "Outcome write exceeded its deadline");
                InvocationReport::critical(COMPONENT, "record exceeded its deadline")
            }
        }
    }
}
