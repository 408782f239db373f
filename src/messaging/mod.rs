//! Dispatch Bus abstraction
//!
//! The scheduler only needs "deliver this order after that delay". The
//! durable local implementation is `queue::FjallQueue`; `MemoryBus` records
//! orders for dry runs and tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::model::FetchOrder;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Producer side of the Dispatch Bus
#[async_trait]
pub trait DispatchProducer: Send + Sync {
    /// Make `order` visible to consumers after `delay`
    async fn send_delayed(&self, order: &FetchOrder, delay: Duration) -> Result<()>;

    /// Health check
    async fn health(&self) -> bool;
}

/// One order as the bus received it
#[derive(Debug, Clone)]
pub struct SentOrder {
    pub order: FetchOrder,
    pub delay: Duration,
}

/// In-memory recorder for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    sent: Arc<Mutex<Vec<SentOrder>>>,
    reject_device: Option<String>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that refuses every order for `device_id`
    pub fn rejecting(device_id: impl Into<String>) -> Self {
        Self {
            reject_device: Some(device_id.into()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentOrder> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Delays sent for one device, in send order
    pub fn delays_for(&self, device_id: &str) -> Vec<Duration> {
        self.sent()
            .into_iter()
            .filter(|s| s.order.aimpoint.device_id == device_id)
            .map(|s| s.delay)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl DispatchProducer for MemoryBus {
    async fn send_delayed(&self, order: &FetchOrder, delay: Duration) -> Result<()> {
        if self.reject_device.as_deref() == Some(order.aimpoint.device_id.as_str()) {
            return Err(MessagingError::PublishFailed(format!(
                "device {} rejected",
                order.aimpoint.device_id
            )));
        }

        tracing::debug!(
            order_id = %order.order_id,
            device_id = %order.aimpoint.device_id,
            delay_secs = delay.as_secs(),
            "Order recorded"
        );
        self.sent
            .lock()
            .map_err(|_| MessagingError::PublishFailed("recorder poisoned".to_string()))?
            .push(SentOrder {
                order: order.clone(),
                delay,
            });
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}
