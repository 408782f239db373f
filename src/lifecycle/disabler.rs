use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{Direction, Result, SweepSummary, Transition};
use crate::config::Config;
use crate::observability::InvocationReport;
use crate::storage::StorageClient;

/// Demotes active aimpoints whose every recent attempt failed.
///
/// No history in the window means no evidence, and the aimpoint stays put.
pub struct Disabler {
    inner: Transition,
}

impl Disabler {
    pub fn new(storage: StorageClient, config: &Config) -> Self {
        Self {
            inner: Transition::new(
                storage,
                Direction::Demote,
                config.lifecycle.disabler_look_back,
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
    use crate::model::{Aimpoint, CollectionType, SelectionOverlay, StatusToken};
    use bytes::Bytes;
    use chrono::TimeZone;

    fn aimpoint(device_id: &str) -> Aimpoint {
        Aimpoint::builder()
            .device_id(device_id)
            .collection_type(CollectionType::M3u)
            .access_url(format!("https://cams.example/{device_id}"))
            .poll_frequency(30)
            .filename_base("rdtc{deviceID}")
            .coll_regions(vec!["Europe (Frankfurt)".to_string()])
            .build()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn seed(storage: &StorageClient, device_id: &str, outcomes: &[bool]) -> Bytes {
        let doc = aimpoint(device_id);
        let bytes = Bytes::from(serde_json::to_vec_pretty(&doc).unwrap());
        storage
            .put(&format!("targets/rdtc/{device_id}.json"), bytes.clone())
            .await
            .unwrap();

        let history = HistoryLog::new(storage.clone());
        for (i, ok) in outcomes.iter().enumerate() {
            let at = now() - chrono::Duration::minutes(20 - i as i64 * 5);
            history.record(&doc, *ok, at.timestamp_millis()).await.unwrap();
        }
        bytes
    }

    async fn put_overlay(storage: &StorageClient, json: &str) {
        storage
            .put("selected/selected-rdtc.json", Bytes::from(json.to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_all_failures_demote() {
        let storage = StorageClient::in_memory();
        let original = seed(&storage, "12", &[false, false, false]).await;
        put_overlay(&storage, r#"{"selections": {"12": "on", "13": "on"}}"#).await;

        let summary = Disabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.moved, 1);
        assert_eq!(summary.overlays_updated, 1);
        assert!(!storage.exists("targets/rdtc/12.json").await.unwrap());
        assert_eq!(storage.get("monitored/rdtc/12.json").await.unwrap(), original);

        let overlay = SelectionOverlay::from_json(
            &storage.get("selected/selected-rdtc.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(overlay.token("12"), Some(&StatusToken::Monitor));
        assert_eq!(overlay.token("13"), Some(&StatusToken::On));
    }

    #[tokio::test]
    async fn test_stale_overlay_is_normalised_without_moves() {
        let storage = StorageClient::in_memory();
        // 12 was demoted earlier but the overlay write never landed
        let doc = aimpoint("12");
        storage
            .put("monitored/rdtc/12.json", Bytes::from(doc.to_json().unwrap()))
            .await
            .unwrap();
        seed(&storage, "13", &[]).await;
        put_overlay(&storage, r#"{"selections": {"12": "on", "13": "on"}}"#).await;

        let report = Disabler::new(storage.clone(), &Config::default())
            .run(now(), Duration::from_secs(60))
            .await;

        assert!(report.status);
        assert_eq!(report.counts.get("moved"), Some(&0));
        assert_eq!(report.counts.get("overlays_updated"), Some(&1));

        let overlay = SelectionOverlay::from_json(
            &storage.get("selected/selected-rdtc.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(overlay.token("12"), Some(&StatusToken::Monitor));
        assert_eq!(overlay.token("13"), Some(&StatusToken::On));
    }

    #[tokio::test]
    async fn test_coherent_overlay_is_not_rewritten() {
        let storage = StorageClient::in_memory();
        seed(&storage, "13", &[true]).await;
        let json = r#"{"selections": {"13": "on"}, "generatedBy": "rdtc-generator"}"#;
        put_overlay(&storage, json).await;

        let summary = Disabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.overlays_updated, 0);
        assert_eq!(
            storage.get("selected/selected-rdtc.json").await.unwrap(),
            Bytes::from(json.to_string())
        );
    }

    #[tokio::test]
    async fn test_any_success_stays_active() {
        let storage = StorageClient::in_memory();
        seed(&storage, "12", &[false, true, false]).await;

        let summary = Disabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.moved, 0);
        assert!(storage.exists("targets/rdtc/12.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_evidence_stays_active() {
        let storage = StorageClient::in_memory();
        seed(&storage, "12", &[]).await;

        let summary = Disabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(storage.exists("targets/rdtc/12.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_failures_outside_look_back_ignored() {
        let storage = StorageClient::in_memory();
        seed(&storage, "12", &[false, false]).await;
        let config: Config = toml::from_str("[lifecycle]\ndisabler_look_back = 300").unwrap();

        let summary = Disabler::new(storage.clone(), &config).sweep(now()).await.unwrap();

        assert_eq!(summary.moved, 0);
    }

    #[tokio::test]
    async fn test_missing_overlay_is_not_an_error() {
        let storage = StorageClient::in_memory();
        seed(&storage, "12", &[false]).await;

        let report = Disabler::new(storage.clone(), &Config::default())
            .run(now(), Duration::from_secs(60))
            .await;

        assert!(report.status);
        assert_eq!(report.counts.get("moved"), Some(&1));
        assert_eq!(report.counts.get("overlays_updated"), Some(&0));
    }

    #[tokio::test]
    async fn test_disabled_and_malformed_items_do_not_abort() {
        let storage = StorageClient::in_memory();
        seed(&storage, "12", &[false]).await;
        let mut disabled = aimpoint("14");
        disabled.enabled = false;
        storage
            .put("targets/rdtc/14.json", Bytes::from(disabled.to_json().unwrap()))
            .await
            .unwrap();
        storage
            .put("targets/rdtc/15.json", Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let summary = Disabler::new(storage.clone(), &Config::default())
            .sweep(now())
            .await
            .unwrap();

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.moved, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(storage.exists("targets/rdtc/14.json").await.unwrap());
    }
}
