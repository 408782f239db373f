use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::messaging::{self, DispatchProducer, MessagingError};
use crate::model::FetchOrder;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Order encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt queue key ({0} bytes)")]
    CorruptKey(usize),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Position of one order in the queue: due time first, then arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub due_ms: u64,
    pub seq: u64,
}

impl QueueKey {
    fn encode(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.due_ms.to_be_bytes());
        key[8..].copy_from_slice(&self.seq.to_be_bytes());
        key
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 16] = bytes
            .try_into()
            .map_err(|_| QueueError::CorruptKey(bytes.len()))?;
        let (due, seq) = raw.split_at(8);
        Ok(Self {
            due_ms: u64::from_be_bytes(due.try_into().map_err(|_| QueueError::CorruptKey(16))?),
            seq: u64::from_be_bytes(seq.try_into().map_err(|_| QueueError::CorruptKey(16))?),
        })
    }
}

/// Order that became due
#[derive(Debug, Clone)]
pub struct QueuedOrder {
    pub key: QueueKey,
    pub order: FetchOrder,
}

/// Order refused by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub order: FetchOrder,
    pub reason: String,
    pub failed_at_ms: u64,
}

/// FjallQueue is the local delayed Dispatch Bus
///
/// Architecture:
/// - `orders` partition: (due_ms, seq) big-endian → FetchOrder (JSON)
/// - `metadata` partition: "next_seq" → u64
/// - `dlq` partition: seq big-endian → DeadLetter (JSON)
///
/// Big-endian keys make a range scan up to `now` yield exactly the due
/// orders, earliest first.
#[derive(Clone)]
pub struct FjallQueue {
    keyspace: Keyspace,
    orders: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = %path.as_ref().display(), "Opening order queue");

        let keyspace = Config::new(path).open()?;

        let orders = keyspace.open_partition("orders", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(next_seq = current_seq, "Order queue ready");

        Ok(Self {
            keyspace,
            orders,
            metadata,
            dlq,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist an order that becomes visible at `due_ms`
    pub fn enqueue_at(&self, order: &FetchOrder, due_ms: u64) -> Result<QueueKey> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let key = QueueKey { due_ms, seq };

        let value = serde_json::to_vec(order)?;
        self.orders.insert(key.encode(), value)?;
        self.metadata.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(
            seq,
            due_ms,
            order_id = %order.order_id,
            device_id = %order.aimpoint.device_id,
            "Order enqueued"
        );
        Ok(key)
    }

    /// Persist an order that becomes visible `delay` after now
    pub fn enqueue_delayed(&self, order: &FetchOrder, delay: Duration) -> Result<QueueKey> {
        self.enqueue_at(order, now_ms() + delay.as_millis() as u64)
    }

    /// Up to `limit` orders due at or before `now_ms`, earliest first
    pub fn due(&self, now_ms: u64, limit: usize) -> Result<Vec<QueuedOrder>> {
        let upper = QueueKey {
            due_ms: now_ms.saturating_add(1),
            seq: 0,
        }
        .encode();

        let mut due = Vec::new();
        for item in self.orders.range(..upper).take(limit) {
            let (key, value) = item?;
            due.push(QueuedOrder {
                key: QueueKey::decode(&key)?,
                order: serde_json::from_slice(&value)?,
            });
        }
        Ok(due)
    }

    /// Remove a delivered order
    pub fn ack(&self, key: QueueKey) -> Result<()> {
        self.orders.remove(key.encode())?;
        Ok(())
    }

    pub fn get(&self, key: QueueKey) -> Result<Option<FetchOrder>> {
        match self.orders.get(key.encode())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Park a refused order in the DLQ and drop it from the live partition
    pub fn move_to_dlq(&self, key: QueueKey, order: &FetchOrder, reason: impl Into<String>) -> Result<()> {
        let entry = DeadLetter {
            order: order.clone(),
            reason: reason.into(),
            failed_at_ms: now_ms(),
        };
        self.dlq.insert(key.seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        self.orders.remove(key.encode())?;

        info!(seq = key.seq, order_id = %order.order_id, reason = %entry.reason, "Order moved to DLQ");
        Ok(())
    }

    /// List DLQ entries (for debugging/inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetter)>> {
        let mut results = Vec::new();

        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            results.push((seq, serde_json::from_slice(&value)?));
        }

        Ok(results)
    }

    /// Orders not yet delivered, due or not
    pub fn pending(&self) -> Result<usize> {
        Ok(self.orders.len()?)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Sync enqueued orders to disk before exit
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Cheap read against the metadata partition
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

#[async_trait]
impl DispatchProducer for FjallQueue {
    async fn send_delayed(&self, order: &FetchOrder, delay: Duration) -> messaging::Result<()> {
        self.enqueue_delayed(order, delay)
            .map(|_| ())
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))
    }

    async fn health(&self) -> bool {
        self.health_check().is_ok()
    }
}

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
