use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{Direction, Result, SweepSummary, Transition};
use crate::config::Config;
use crate::observability::InvocationReport;
use crate::storage::StorageClient;

/// Promotes monitored aimpoints back to active after any recent success.
///
/// A single success is enough, so when history holds both outcomes the
/// enabler wins any race with the disabler.
pub struct Enabler {
    inner: Transition,
}

impl Enabler {
    pub fn new(storage: StorageClient, config: &Config) -> Self {
        Self {
            inner: Transition::new(
                storage,
                Direction::Promote,
                config.lifecycle.enabler_look_back,
                config.iteration_cap(),
            ),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        self.inner.sweep(now).await
    }

    pub async fn run(&self, now: DateTime<Utc>, deadline: Duration) -> InvocationReport {
        self.inner.run(now, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryLog;
    use crate::lifecycle::Disabler;
    use crate::model::{Aimpoint, CollectionType, SelectionOverlay, StatusToken};
    use bytes::Bytes;
    use chrono::TimeZone;

    fn aimpoint(device_id: &str) -> Aimpoint {
        Aimpoint::builder()
            .device_id(device_id)
            .collection_type(CollectionType::Stills)
            .access_url(format!("https://cams.example/{device_id}.jpg"))
            .poll_frequency(60)
            .filename_base("rdtc{deviceID}")
            .coll_regions(vec!["Europe (Frankfurt)".to_string()])
            .build()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn record(storage: &StorageClient, doc: &Aimpoint, outcomes: &[bool], at: DateTime<Utc>) {
        let history = HistoryLog::new(storage.clone());
        for (i, ok) in outcomes.iter().enumerate() {
            let t = at - chrono::Duration::minutes(20 - i as i64 * 5);
            history.record(doc, *ok, t.timestamp_millis()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_any_success_promotes() {
        let storage = StorageClient::in_memory();
        let doc = aimpoint("12");
        storage
            .put("monitored/rdtc/12.json", Bytes::from(doc.to_json().unwrap()))
            .await
            .unwrap();
        storage
            .put(
                "selected/selected-rdtc.json",
                Bytes::from_static(br#"{"selections": {"12": "monitor", "40": "monitor-mp4"}}"#),
            )
            .await
            .unwrap();
        record(&storage, &doc, &[false, true, false], now()).await;

        let summary = Enabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.moved, 1);
        assert!(storage.exists("targets/rdtc/12.json").await.unwrap());
        assert!(!storage.exists("monitored/rdtc/12.json").await.unwrap());

        let overlay = SelectionOverlay::from_json(
            &storage.get("selected/selected-rdtc.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(overlay.token("12"), Some(&StatusToken::On));
        assert_eq!(overlay.token("40"), Some(&StatusToken::MonitorMp4));
    }

    #[tokio::test]
    async fn test_active_ids_regain_active_tokens() {
        let storage = StorageClient::in_memory();
        let doc = aimpoint("12");
        // Promoted by an earlier run whose overlay write was lost
        storage
            .put("targets/rdtc/12.json", Bytes::from(doc.to_json().unwrap()))
            .await
            .unwrap();
        storage
            .put(
                "selected/selected-rdtc.json",
                Bytes::from_static(br#"{"selections": {"12": "monitor-decoy", "13": "off"}}"#),
            )
            .await
            .unwrap();

        let summary = Enabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.overlays_updated, 1);
        let overlay = SelectionOverlay::from_json(
            &storage.get("selected/selected-rdtc.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(overlay.token("12"), Some(&StatusToken::Decoy));
        assert_eq!(overlay.token("13"), Some(&StatusToken::Off));
    }

    #[tokio::test]
    async fn test_all_failures_stay_monitored() {
        let storage = StorageClient::in_memory();
        let doc = aimpoint("12");
        storage
            .put("monitored/rdtc/12.json", Bytes::from(doc.to_json().unwrap()))
            .await
            .unwrap();
        record(&storage, &doc, &[false, false], now()).await;

        let summary = Enabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.moved, 0);
        assert!(storage.exists("monitored/rdtc/12.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_round_trip_is_bytewise_identical() {
        let storage = StorageClient::in_memory();
        let doc = aimpoint("12");
        // Pretty-printed with a trailing newline: the move must not re-encode it
        let original = Bytes::from(format!("{}\n", serde_json::to_string_pretty(&doc).unwrap()));
        storage.put("targets/rdtc/12.json", original.clone()).await.unwrap();

        let failing_at = now() - chrono::Duration::hours(2);
        record(&storage, &doc, &[false, false], failing_at).await;
        Disabler::new(storage.clone(), &Config::default())
            .sweep(failing_at)
            .await
            .unwrap();
        assert!(storage.exists("monitored/rdtc/12.json").await.unwrap());

        record(&storage, &doc, &[true], now()).await;
        Enabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(storage.get("targets/rdtc/12.json").await.unwrap(), original);
        assert!(!storage.exists("monitored/rdtc/12.json").await.unwrap());
    }
}
