use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::cadence::{Cadence, fetch_delays};
use super::Result;
use crate::config::Config;
use crate::messaging::DispatchProducer;
use crate::model::{Aimpoint, FetchOrder, OrderOverrides};
use crate::observability::{InvocationReport, Severity};
use crate::storage::{AimpointKey, Placement, StorageClient};

const COMPONENT: &str = "monitor";

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub active: usize,
    pub probed: usize,
    pub enqueued: usize,
    /// Aimpoints whose pollFrequency was raised to the minimum
    pub poll_raised: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TickSummary {
    pub fn report(&self) -> InvocationReport {
        let done = format!("tick complete, {} orders enqueued", self.enqueued);
        let base = match (self.failed, self.poll_raised) {
            (0, 0) => InvocationReport::ok(COMPONENT, done),
            // raised poll frequencies are surfaced without failing the tick
            (0, _) => InvocationReport::ok(COMPONENT, done).with_severity(Severity::Warning),
            (failed, _) => {
                InvocationReport::partial(COMPONENT, format!("tick complete, {failed} items failed"))
            }
        };
        base.with_count("active", self.active as u64)
            .with_count("probed", self.probed as u64)
            .with_count("enqueued", self.enqueued as u64)
            .with_count("poll_raised", self.poll_raised as u64)
            .with_count("skipped", self.skipped as u64)
            .with_count("failed", self.failed as u64)
    }
}

/// Periodic scheduler: expands collectible aimpoints into delayed fetch orders
pub struct Monitor {
    storage: StorageClient,
    producer: Arc<dyn DispatchProducer>,
    cadence: Cadence,
    monitor_frequency: u64,
    iteration_cap: Option<usize>,
}

impl Monitor {
    pub fn new(storage: StorageClient, producer: Arc<dyn DispatchProducer>, config: &Config) -> Self {
        Self {
            storage,
            producer,
            cadence: Cadence::from_config(&config.scheduler),
            monitor_frequency: config.scheduler.monitor_frequency,
            iteration_cap: config.iteration_cap(),
        }
    }

    /// Run one tick under `deadline` and turn the result into an audit record
    pub async fn run(&self, now: DateTime<Utc>, deadline: Duration) -> InvocationReport {
        match tokio::time::timeout(deadline, self.tick(now)).await {
            Ok(Ok(summary)) => summary.report(),
            Ok(Err(e)) => {
                error!(error = %e, severity = "CRITICAL", "Monitor tick failed");
                InvocationReport::critical(COMPONENT, format!("tick failed: {e}"))
            }
            Err(_) => {
                error!(?deadline, severity = "CRITICAL", "Monitor tick exceeded its deadline");
                InvocationReport::critical(COMPONENT, "tick exceeded its deadline")
            }
        }
    }

    /// One tick at logical time `now`.
    ///
    /// Enumeration failures abort the tick; per-aimpoint failures are counted
    /// and the tick moves on.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut active = self.storage.list_aimpoints(Placement::Active).await?;
        let mut monitored = self.storage.list_aimpoints(Placement::Monitored).await?;

        let active_domains: HashSet<String> = active.iter().map(|k| k.domain.clone()).collect();

        if let Some(cap) = self.iteration_cap {
            active.truncate(cap);
            monitored.truncate(cap);
        }

        let probes = {
            let mut rng = rand::thread_rng();
            select_probes(&monitored, &active_domains, &mut rng)
        };

        info!(
            active = active.len(),
            monitored = monitored.len(),
            probes = probes.len(),
            tick = %now,
            "Monitor tick started"
        );

        let mut summary = TickSummary {
            active: active.len(),
            probed: probes.len(),
            ..TickSummary::default()
        };

        for key in active.iter().chain(&probes) {
            if let Some(aimpoint) = self.load(key, &mut summary).await {
                self.schedule(key, &aimpoint, now, &mut summary).await;
            }
        }

        info!(
            enqueued = summary.enqueued,
            skipped = summary.skipped,
            failed = summary.failed,
            "Monitor tick finished"
        );
        Ok(summary)
    }

    /// Expand one aimpoint into its delayed orders for this tick
    async fn schedule(
        &self,
        key: &AimpointKey,
        aimpoint: &Aimpoint,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let probe = key.placement == Placement::Monitored;
        let every = if probe {
            aimpoint.monitor_frequency_or(self.monitor_frequency)
        } else {
            aimpoint.monitor_frequency_or(1)
        };
        if now.hour() as u64 % every != 0 {
            debug!(key = %key, every, "Not due this hour");
            summary.skipped += 1;
            return;
        }

        if self.cadence.step(aimpoint.poll_frequency).raised {
            warn!(
                device_id = %aimpoint.device_id,
                poll_frequency = aimpoint.poll_frequency,
                "pollFrequency below minimum, raised"
            );
            summary.poll_raised += 1;
        }

        let delays = fetch_delays(aimpoint, &self.cadence, now);
        if delays.is_empty() {
            debug!(key = %key, "Nothing due this tick");
            summary.skipped += 1;
            return;
        }
        self.emit(aimpoint, &delays, now, probe, summary).await;
    }

    async fn load(&self, key: &AimpointKey, summary: &mut TickSummary) -> Option<Aimpoint> {
        let bytes = match self.storage.get(&key.to_key()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read aimpoint");
                summary.failed += 1;
                return None;
            }
        };
        match Aimpoint::from_json(&bytes) {
            Ok(aimpoint) if aimpoint.enabled => Some(aimpoint),
            Ok(_) => {
                debug!(key = %key, "Aimpoint disabled");
                summary.skipped += 1;
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed aimpoint skipped");
                summary.failed += 1;
                None
            }
        }
    }

    async fn emit(
        &self,
        aimpoint: &Aimpoint,
        delays: &[Duration],
        now: DateTime<Utc>,
        probe: bool,
        summary: &mut TickSummary,
    ) {
        let mut failed = false;
        for delay in delays {
            let order = FetchOrder::new(
                aimpoint.clone(),
                OrderOverrides {
                    delay_secs: delay.as_secs(),
                    tick_ms: now.timestamp_millis(),
                    probe,
                },
            );
            match self.producer.send_delayed(&order, *delay).await {
                Ok(()) => summary.enqueued += 1,
                Err(e) => {
                    error!(
                        device_id = %aimpoint.device_id,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Failed to enqueue fetch order"
                    );
                    failed = true;
                }
            }
        }
        if failed {
            summary.failed += 1;
        }
    }
}

/// Monitored aimpoints to probe this tick.
///
/// Domains that still have active members are probed in full. A domain with
/// no active members is fully down: one member is picked at random.
pub fn select_probes<R: Rng + ?Sized>(
    monitored: &[AimpointKey],
    active_domains: &HashSet<String>,
    rng: &mut R,
) -> Vec<AimpointKey> {
    let mut by_domain: BTreeMap<&str, Vec<&AimpointKey>> = BTreeMap::new();
    for key in monitored {
        by_domain.entry(key.domain.as_str()).or_default().push(key);
    }

    let mut probes = Vec::new();
    for (domain, members) in by_domain {
        if active_domains.contains(domain) {
            probes.extend(members.into_iter().cloned());
        } else if let Some(chosen) = members.choose(rng) {
            probes.push((*chosen).clone());
        }
    }
    probes
}
