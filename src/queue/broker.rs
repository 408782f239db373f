use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::queue::store::{FjallQueue, QueueError, QueueKey, now_ms};
use crate::model::FetchOrder;

/// A due order handed to one dispatcher task
#[derive(Clone, Debug)]
pub struct OrderEnvelope {
    pub key: QueueKey,
    pub order: FetchOrder,
}

/// OrderBroker moves due orders from the FjallQueue to the dispatcher pool
///
/// Architecture:
/// 1. Scheduler persists orders with a due time (`FjallQueue::enqueue_delayed`)
/// 2. Broker polls the queue for orders whose due time has passed
/// 3. Each due order goes to the next dispatcher (round-robin) over a bounded channel
/// 4. Once the channel accepts the envelope the order is acked and leaves the queue
/// 5. Backpressure: a full channel blocks the pump, so orders stay persisted
pub struct OrderBroker {
    queue: FjallQueue,
    worker_channels: Vec<mpsc::Sender<OrderEnvelope>>,
    next_worker: AtomicUsize,
    batch_size: usize,
}

impl OrderBroker {
    /// Create a new OrderBroker with dispatcher channels
    ///
    /// Returns:
    /// - OrderBroker instance
    /// - Vec of receivers (one per dispatcher task)
    pub fn new(
        queue: FjallQueue,
        num_workers: usize,
        channel_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<OrderEnvelope>>) {
        info!(num_workers, channel_size, "Creating OrderBroker with dispatcher channels");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size);
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created dispatcher channel");
        }

        let broker = Self {
            queue,
            worker_channels,
            next_worker: AtomicUsize::new(0),
            batch_size: num_workers.max(1) * channel_size.max(1),
        };

        (broker, worker_receivers)
    }

    /// Hand every order due at `now_ms` to a dispatcher. Returns how many were handed over.
    pub async fn pump(&self, now_ms: u64) -> Result<usize, QueueError> {
        let due = self.queue.due(now_ms, self.batch_size)?;
        let mut delivered = 0;

        for queued in due {
            let worker_idx =
                self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();
            let envelope = OrderEnvelope {
                key: queued.key,
                order: queued.order,
            };

            if self.worker_channels[worker_idx].send(envelope).await.is_err() {
                // Order stays persisted and is retried on the next pump
                warn!(seq = queued.key.seq, worker_idx, "Dispatcher channel closed, order kept");
                break;
            }

            self.queue.ack(queued.key)?;
            delivered += 1;
            debug!(seq = queued.key.seq, worker_idx, "Order sent to dispatcher");
        }

        Ok(delivered)
    }

    /// Poll the queue every `interval` until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.pump(now_ms()).await {
                        error!(error = %e, "Broker pump failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("OrderBroker stopping");
                    break;
                }
            }
        }
    }

    /// Get number of dispatcher tasks
    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// Check if all dispatcher channels are healthy (not closed)
    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
    }
}
