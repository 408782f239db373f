//! Disabler and enabler: move aimpoints between `targets/` and `monitored/`
//! based on their recent history, and keep the selection overlays in step.
//!
//! Both sweeps share one transition routine parameterised by `Direction`.
//! Moves are copy-then-delete and idempotent, so two movers racing on the
//! same aimpoint are harmless. After the moves, every overlay is brought in
//! line with where its ids actually live, so a lost overlay write or a racing
//! sweep is repaired on the next run.

pub mod disabler;
pub mod enabler;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::history::{HistoryError, HistoryLog, Verdict};
use crate::model::{Aimpoint, AimpointError, SelectionOverlay};
use crate::observability::InvocationReport;
use crate::storage::keys::{SELECTED_PREFIX, overlay_domain, overlay_key};
use crate::storage::{AimpointKey, MoveOutcome, Placement, StorageClient, StorageError};

pub use disabler::Disabler;
pub use enabler::Enabler;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("partial move {from} -> {to}: {reason}")]
    PartialMove {
        from: String,
        to: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("malformed aimpoint: {0}")]
    Malformed(#[from] AimpointError),

    #[error("malformed selection overlay {key}: {source}")]
    Overlay {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PartialMove { from, to, reason } => {
                LifecycleError::PartialMove { from, to, reason }
            }
            other => LifecycleError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Which way a sweep moves aimpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// active -> monitored when every recent attempt failed
    Demote,
    /// monitored -> active when any recent attempt succeeded
    Promote,
}

impl Direction {
    pub fn source(&self) -> Placement {
        match self {
            Direction::Demote => Placement::Active,
            Direction::Promote => Placement::Monitored,
        }
    }

    pub fn applies_to(&self, verdict: Verdict) -> bool {
        match (self, verdict) {
            (Direction::Demote, Verdict::AllFailed) => true,
            (Direction::Promote, Verdict::AnySucceeded) => true,
            _ => false,
        }
    }

    fn component(&self) -> &'static str {
        match self {
            Direction::Demote => "disabler",
            Direction::Promote => "enabler",
        }
    }
}

/// Counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub moved: usize,
    pub overlays_updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn report(&self, component: &'static str) -> InvocationReport {
        let base = if self.failed == 0 {
            InvocationReport::ok(component, format!("sweep complete, {} moved", self.moved))
        } else {
            InvocationReport::partial(
                component,
                format!("sweep complete, {} moved, {} failed", self.moved, self.failed),
            )
        };
        base.with_count("scanned", self.scanned as u64)
            .with_count("moved", self.moved as u64)
            .with_count("overlays_updated", self.overlays_updated as u64)
            .with_count("skipped", self.skipped as u64)
            .with_count("failed", self.failed as u64)
    }
}

/// Shared sweep machinery
pub(crate) struct Transition {
    storage: StorageClient,
    history: HistoryLog,
    direction: Direction,
    look_back: chrono::Duration,
    iteration_cap: Option<usize>,
}

impl Transition {
    pub(crate) fn new(
        storage: StorageClient,
        direction: Direction,
        look_back_secs: u64,
        iteration_cap: Option<usize>,
    ) -> Self {
        Self {
            history: HistoryLog::new(storage.clone()),
            storage,
            direction,
            look_back: chrono::Duration::seconds(look_back_secs as i64),
            iteration_cap,
        }
    }

    pub(crate) async fn run(&self, now: DateTime<Utc>, deadline: Duration) -> InvocationReport {
        let component = self.direction.component();
        match tokio::time::timeout(deadline, self.sweep(now)).await {
            Ok(Ok(summary)) => summary.report(component),
            Ok(Err(e)) => {
                error!(component, error = %e, severity = "CRITICAL", "Sweep failed");
                InvocationReport::critical(component, format!("sweep failed: {e}"))
            }
            Err(_) => {
                error!(component, ?deadline, severity = "CRITICAL", "Sweep exceeded its deadline");
                InvocationReport::critical(component, "sweep exceeded its deadline")
            }
        }
    }

    /// Evaluate every aimpoint in the source placement; per-item errors are
    /// logged and the sweep continues.
    pub(crate) async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let mut keys = self.storage.list_aimpoints(self.direction.source()).await?;
        if let Some(cap) = self.iteration_cap {
            keys.truncate(cap);
        }

        info!(
            direction = ?self.direction,
            candidates = keys.len(),
            look_back_secs = self.look_back.num_seconds(),
            "Sweep started"
        );

        let mut summary = SweepSummary {
            scanned: keys.len(),
            ..SweepSummary::default()
        };

        for key in &keys {
            match self.transition(key, now).await {
                Ok(true) => summary.moved += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Aimpoint transition failed");
                    summary.failed += 1;
                }
            }
        }

        if let Err(e) = self.normalise_overlays(&mut summary).await {
            error!(direction = ?self.direction, error = %e, "Overlay normalisation failed");
            summary.failed += 1;
        }

        info!(
            direction = ?self.direction,
            moved = summary.moved,
            skipped = summary.skipped,
            failed = summary.failed,
            "Sweep finished"
        );
        Ok(summary)
    }

    /// Move one aimpoint if its history calls for it; `true` when it moved
    async fn transition(&self, key: &AimpointKey, now: DateTime<Utc>) -> Result<bool> {
        let from = key.to_key();
        let bytes = self.storage.get(&from).await?;
        let aimpoint = Aimpoint::from_json(&bytes)?;
        if !aimpoint.enabled {
            debug!(key = %key, "Aimpoint disabled");
            return Ok(false);
        }

        let recent = self
            .history
            .recent(&aimpoint.file_stem(), now, self.look_back)
            .await?;
        let verdict = recent.verdict();
        if !self.direction.applies_to(verdict) {
            debug!(key = %key, ?verdict, records = recent.keys.len(), "Left in place");
            return Ok(false);
        }

        let to = key.with_placement(self.direction.source().other()).to_key();
        let outcome = self.storage.move_object(&from, &to).await?;
        if outcome == MoveOutcome::AlreadyMoved {
            warn!(from = %from, to = %to, "Aimpoint already moved by a concurrent sweep");
        }

        info!(
            device_id = %aimpoint.device_id,
            domain = %key.domain,
            from = %from,
            to = %to,
            failures = recent.failures(),
            successes = recent.successes(),
            "Aimpoint moved"
        );
        Ok(true)
    }

    /// Rewrite every overlay so ids under `monitored/` carry a `monitor*`
    /// token and ids under `targets/` an active one. Domains without an
    /// overlay are skipped.
    async fn normalise_overlays(&self, summary: &mut SweepSummary) -> Result<()> {
        let overlays = self.storage.list(&format!("{SELECTED_PREFIX}/")).await?;
        if overlays.is_empty() {
            return Ok(());
        }

        let mut members: BTreeMap<String, DomainMembers> = BTreeMap::new();
        for placement in [Placement::Active, Placement::Monitored] {
            for key in self.storage.list_aimpoints(placement).await? {
                members.entry(key.domain).or_default().insert(placement, key.id);
            }
        }

        let none = DomainMembers::default();
        for domain in overlays.iter().filter_map(|key| overlay_domain(key)) {
            let key = overlay_key(domain);
            match self.rewrite_overlay(&key, members.get(domain).unwrap_or(&none)).await {
                Ok(0) => {}
                Ok(changed) => {
                    summary.overlays_updated += 1;
                    info!(domain = %domain, changed, "Selection overlay rewritten");
                }
                Err(e) => {
                    error!(domain = %domain, error = %e, "Selection overlay rewrite failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Returns the number of tokens changed
    async fn rewrite_overlay(&self, key: &str, members: &DomainMembers) -> Result<usize> {
        let Some(bytes) = self.storage.get_opt(key).await? else {
            return Ok(0);
        };

        let overlay_err = |source| LifecycleError::Overlay {
            key: key.to_string(),
            source,
        };
        let mut overlay = SelectionOverlay::from_json(&bytes).map_err(overlay_err)?;
        let changed = overlay.demote(members.settled(Placement::Monitored))
            + overlay.promote(members.settled(Placement::Active));

        if changed > 0 {
            let body = overlay.to_json().map_err(overlay_err)?;
            self.storage.put(key, body.into()).await?;
        }
        Ok(changed)
    }
}

/// Aimpoint ids of one domain, by placement
#[derive(Debug, Default)]
struct DomainMembers {
    active: BTreeSet<String>,
    monitored: BTreeSet<String>,
}

impl DomainMembers {
    fn insert(&mut self, placement: Placement, id: String) {
        match placement {
            Placement::Active => self.active.insert(id),
            Placement::Monitored => self.monitored.insert(id),
        };
    }

    /// Ids found only under `placement`; an id in both is mid-move and left alone
    fn settled(&self, placement: Placement) -> impl Iterator<Item = &str> {
        let (mine, other) = match placement {
            Placement::Active => (&self.active, &self.monitored),
            Placement::Monitored => (&self.monitored, &self.active),
        };
        mine.difference(other).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_verdicts() {
        assert!(Direction::Demote.applies_to(Verdict::AllFailed));
        assert!(!Direction::Demote.applies_to(Verdict::NoEvidence));
        assert!(!Direction::Demote.applies_to(Verdict::AnySucceeded));
        assert!(Direction::Promote.applies_to(Verdict::AnySucceeded));
        assert!(!Direction::Promote.applies_to(Verdict::AllFailed));
        assert!(!Direction::Promote.applies_to(Verdict::NoEvidence));
    }

    #[test]
    fn test_partial_move_maps_to_its_own_variant() {
        let err = LifecycleError::from(StorageError::PartialMove {
            from: "targets/a/1.json".into(),
            to: "monitored/a/1.json".into(),
            reason: "destination absent after move".into(),
        });
        assert!(matches!(err, LifecycleError::PartialMove { .. }));
    }

    #[test]
    fn test_ids_in_both_placements_are_not_settled() {
        let mut members = DomainMembers::default();
        members.insert(Placement::Active, "11".into());
        members.insert(Placement::Active, "12".into());
        members.insert(Placement::Monitored, "12".into());
        members.insert(Placement::Monitored, "13".into());

        let active: Vec<&str> = members.settled(Placement::Active).collect();
        let monitored: Vec<&str> = members.settled(Placement::Monitored).collect();
        assert_eq!(active, vec!["11"]);
        assert_eq!(monitored, vec!["13"]);
    }
}
