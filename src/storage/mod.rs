//! Object storage abstraction for aimpoint documents, overlays and history
//! Uses Apache Arrow object_store crate

pub mod keys;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{ObjectStore, PutPayload, path::Path as StoragePath};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, StorageProvider};

pub use keys::{AimpointKey, Outcome, OutcomeKey, Placement};

/// Default per-call deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Local retries for transient failures before surfacing the error
const TRANSIENT_RETRIES: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{op} on '{key}' exceeded its deadline")]
    Timeout { op: &'static str, key: String },

    #[error("Partial move {from} -> {to}: {reason}")]
    PartialMove {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[source] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::ObjectStoreError(other),
        }
    }
}

impl StorageError {
    /// Timeouts and generic backend failures are worth one more try
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout { .. }
                | StorageError::ObjectStoreError(object_store::Error::Generic { .. })
        )
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// What a move actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Source was already gone and destination present (a concurrent mover won)
    AlreadyMoved,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    call_timeout: Duration,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self {
            store,
            bucket,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(object_store::memory::InMemory::new()),
            "highwaypatrol-local".to_string(),
        )
    }

    /// Local directory acting as a bucket (fixtures, single-host deployments)
    pub fn local(root: &Path, bucket: String) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store), bucket))
    }

    /// Build the client the configuration asks for. Non-prod modes always
    /// read from the local fixture directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        let client = if !config.mode.is_prod() {
            Self::local(&storage.fixture_dir, storage.bucket.clone())?
        } else {
            match storage.provider {
                StorageProvider::Memory => Self::in_memory(),
                StorageProvider::Local => Self::local(&storage.root, storage.bucket.clone())?,
                StorageProvider::S3 => {
                    let mut builder = object_store::aws::AmazonS3Builder::from_env()
                        .with_bucket_name(&storage.bucket);
                    if let Some(region) = &storage.region {
                        builder = builder.with_region(region);
                    }
                    if let Some(endpoint) = &storage.endpoint {
                        builder = builder.with_endpoint(endpoint).with_allow_http(true);
                    }
                    if let (Some(access), Some(secret)) =
                        (&storage.access_key, &storage.secret_key)
                    {
                        builder = builder
                            .with_access_key_id(access)
                            .with_secret_access_key(secret);
                    }
                    let store = builder
                        .build()
                        .map_err(|e| StorageError::Configuration(e.to_string()))?;
                    Self::new(Arc::new(store), storage.bucket.clone())
                }
            }
        };
        Ok(client.with_call_timeout(Duration::from_secs(storage.call_timeout_secs)))
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run one store call under the per-call deadline, retrying transient failures once
    async fn call<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = object_store::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => StorageError::from(e),
                Err(_) => StorageError::Timeout {
                    op,
                    key: key.to_string(),
                },
            };

            if attempt > TRANSIENT_RETRIES || !err.is_transient() {
                return Err(err);
            }
            warn!(op, key, attempt, error = %err, "Transient storage failure, retrying");
        }
    }

    /// Upload bytes to storage
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = StoragePath::from(key);
        let size = data.len();

        self.call("put", key, || {
            self.store.put(&path, PutPayload::from(data.clone()))
        })
        .await?;

        debug!(key, size, "Uploaded to storage");
        Ok(())
    }

    /// Download from storage
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);

        let bytes = self
            .call("get", key, || async {
                self.store.get(&path).await?.bytes().await
            })
            .await?;

        debug!(key, size = bytes.len(), "Downloaded from storage");
        Ok(bytes)
    }

    /// Download, mapping a missing object to `None`
    pub async fn get_opt(&self, key: &str) -> Result<Option<Bytes>> {
        match self.get(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.call("head", key, || self.store.head(&path)).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List every key under `prefix`, sorted
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = StoragePath::from(prefix);

        let metas = self
            .call("list", prefix, || {
                self.store.list(Some(&path)).try_collect::<Vec<_>>()
            })
            .await?;

        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    /// List keys under `prefix` that sort strictly after `start_after`, sorted
    pub async fn list_after(&self, prefix: &str, start_after: &str) -> Result<Vec<String>> {
        let path = StoragePath::from(prefix);
        let offset = StoragePath::from(start_after);

        let metas = self
            .call("list_after", prefix, || {
                self.store
                    .list_with_offset(Some(&path), &offset)
                    .try_collect::<Vec<_>>()
            })
            .await?;

        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    /// Aimpoint documents under one placement; foreign keys are skipped
    pub async fn list_aimpoints(&self, placement: Placement) -> Result<Vec<AimpointKey>> {
        let prefix = format!("{}/", placement.prefix());
        let keys = self.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let parsed = AimpointKey::parse(key);
                if parsed.is_none() {
                    debug!(key, "Skipping non-aimpoint key");
                }
                parsed
            })
            .collect())
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let src = StoragePath::from(from);
        let dst = StoragePath::from(to);
        self.call("copy", from, || self.store.copy(&src, &dst)).await
    }

    /// Delete a key; deleting a missing key is a no-op
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = StoragePath::from(key);
        match self.call("delete", key, || self.store.delete(&path)).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Copy-then-delete move with a destination check.
    ///
    /// Repeating a completed move is a no-op. A missing destination after the
    /// move, or a failed source delete, is a `PartialMove`.
    pub async fn move_object(&self, from: &str, to: &str) -> Result<MoveOutcome> {
        let outcome = match self.copy(from, to).await {
            Ok(()) => MoveOutcome::Moved,
            Err(StorageError::NotFound(_)) if self.exists(to).await? => MoveOutcome::AlreadyMoved,
            Err(e) => return Err(e),
        };

        if let Err(e) = self.delete(from).await {
            return Err(StorageError::PartialMove {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("source delete failed: {e}"),
            });
        }

        if !self.exists(to).await? {
            return Err(StorageError::PartialMove {
                from: from.to_string(),
                to: to.to_string(),
                reason: "destination absent after move".to_string(),
            });
        }

        debug!(from, to, ?outcome, "Moved object");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_exists() {
        let storage = StorageClient::in_memory();
        storage.put("targets/rdtc/12.json", Bytes::from_static(b"{}")).await.unwrap();

        assert!(storage.exists("targets/rdtc/12.json").await.unwrap());
        assert!(!storage.exists("targets/rdtc/13.json").await.unwrap());
        assert_eq!(storage.get("targets/rdtc/12.json").await.unwrap(), Bytes::from_static(b"{}"));
        assert!(matches!(
            storage.get("targets/rdtc/13.json").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.get_opt("targets/rdtc/13.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_is_segment_scoped_and_sorted() {
        let storage = StorageClient::in_memory();
        for key in ["status/cam1/b", "status/cam1/a", "status/cam10/a", "targets/x/1.json"] {
            storage.put(key, Bytes::new()).await.unwrap();
        }

        let keys = storage.list("status/cam1/").await.unwrap();
        assert_eq!(keys, vec!["status/cam1/a", "status/cam1/b"]);
    }

    #[tokio::test]
    async fn test_list_aimpoints_skips_foreign_keys() {
        let storage = StorageClient::in_memory();
        for key in [
            "targets/rdtc/12.json",
            "targets/rdtc/notes.txt",
            "targets/avanta/3.json",
            "monitored/rdtc/13.json",
        ] {
            storage.put(key, Bytes::new()).await.unwrap();
        }

        let active = storage.list_aimpoints(Placement::Active).await.unwrap();
        assert_eq!(
            active,
            vec![
                AimpointKey::new(Placement::Active, "avanta", "3"),
                AimpointKey::new(Placement::Active, "rdtc", "12"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_after_cursor() {
        let storage = StorageClient::in_memory();
        for key in [
            "status/cam/20240101000000_1_failure",
            "status/cam/20240101001000_2_success",
            "status/cam/20240101002000_3_failure",
        ] {
            storage.put(key, Bytes::new()).await.unwrap();
        }

        let keys = storage
            .list_after("status/cam/", "status/cam/20240101001000")
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                "status/cam/20240101001000_2_success",
                "status/cam/20240101002000_3_failure"
            ]
        );
    }

    #[tokio::test]
    async fn test_move_is_bytewise_and_idempotent() {
        let storage = StorageClient::in_memory();
        let doc = Bytes::from_static(b"{\"deviceID\": \"12\"}\n");
        storage.put("targets/rdtc/12.json", doc.clone()).await.unwrap();

        let first = storage
            .move_object("targets/rdtc/12.json", "monitored/rdtc/12.json")
            .await
            .unwrap();
        assert_eq!(first, MoveOutcome::Moved);
        assert!(!storage.exists("targets/rdtc/12.json").await.unwrap());
        assert_eq!(storage.get("monitored/rdtc/12.json").await.unwrap(), doc);

        let second = storage
            .move_object("targets/rdtc/12.json", "monitored/rdtc/12.json")
            .await
            .unwrap();
        assert_eq!(second, MoveOutcome::AlreadyMoved);
    }

    #[tokio::test]
    async fn test_move_missing_source_and_destination_fails() {
        let storage = StorageClient::in_memory();
        let result = storage.move_object("targets/a/1.json", "monitored/a/1.json").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_filesystem_backend() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageClient::local(temp_dir.path(), "fixtures".to_string()).unwrap();
        storage.put("selected/selected-a.json", Bytes::from_static(b"{}")).await.unwrap();
        assert!(temp_dir.path().join("selected/selected-a.json").exists());
        storage.delete("selected/selected-a.json").await.unwrap();
        storage.delete("selected/selected-a.json").await.unwrap();
        assert!(storage.list("selected").await.unwrap().is_empty());
    }
}
