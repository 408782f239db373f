//! Long-running modes. `serve` runs the event surface plus the local delayed
//! queue feeding a pool of dispatcher tasks; ticks arrive over HTTP. `run`
//! adds internal timers for the scheduler, disabler and enabler. Everything
//! stops together on Ctrl+C or SIGTERM.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher, HttpInvoker, InvokeError};
use crate::observability::{InvocationReport, Metrics};
use crate::queue::{FjallQueue, OrderBroker, OrderEnvelope, QueueError};
use crate::selfcheck;
use crate::storage::{StorageClient, StorageError};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("invoker setup failed: {0}")]
    Invoker(#[from] InvokeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("event surface failed: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Run until a shutdown signal arrives; `timers` starts the periodic ticks
pub async fn run(config: Config, timers: bool) -> Result<()> {
    selfcheck::run(&config.dispatch).await;

    let storage = StorageClient::from_config(&config)?;
    info!(path = %config.queue.path.display(), "Opening dispatch queue");
    let queue = FjallQueue::open(&config.queue.path)?;
    let pending = queue.pending()?;
    if pending > 0 {
        info!(pending, "Resuming with persisted orders");
    }

    let invoker = HttpInvoker::from_config(&config.dispatch, config.deadlines.dispatch())?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(invoker), &config)?);
    let metrics = Arc::new(Metrics::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let (broker, receivers) =
        OrderBroker::new(queue.clone(), config.queue.workers, config.queue.channel_size);
    let broker = Arc::new(broker);
    tasks.push(tokio::spawn(broker.clone().run(
        Duration::from_millis(config.queue.poll_interval_ms),
        shutdown_rx.clone(),
    )));
    for (worker_id, rx) in receivers.into_iter().enumerate() {
        tasks.push(tokio::spawn(dispatch_worker(
            worker_id,
            rx,
            dispatcher.clone(),
            queue.clone(),
            metrics.clone(),
        )));
    }

    let state = AppState::new(
        config.clone(),
        storage,
        Arc::new(queue.clone()),
        dispatcher,
        metrics,
    )
    .with_queue(queue.clone());

    if timers {
        tasks.push(spawn_timer(
            "monitor",
            config.scheduler.period(),
            shutdown_rx.clone(),
            {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move {
                        state
                            .monitor
                            .run(Utc::now(), state.config.deadlines.monitor())
                            .await
                    }
                }
            },
            state.metrics.clone(),
        ));
        tasks.push(spawn_timer(
            "disabler",
            Duration::from_secs(config.lifecycle.disabler_interval_secs),
            shutdown_rx.clone(),
            {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move {
                        state
                            .disabler
                            .run(Utc::now(), state.config.deadlines.lifecycle())
                            .await
                    }
                }
            },
            state.metrics.clone(),
        ));
        tasks.push(spawn_timer(
            "enabler",
            Duration::from_secs(config.lifecycle.enabler_interval_secs),
            shutdown_rx.clone(),
            {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move {
                        state
                            .enabler
                            .run(Utc::now(), state.config.deadlines.lifecycle())
                            .await
                    }
                }
            },
            state.metrics.clone(),
        ));
    }

    let served = api::serve(state, config.server.bind_addr, api::shutdown_signal()).await;

    info!("Stopping background tasks");
    let _ = shutdown_tx.send(true);
    // Dropping the broker closes the dispatcher channels once in-flight orders drain
    drop(broker);
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    if let Err(e) = queue.flush() {
        error!(error = %e, "Queue flush on shutdown failed");
    }

    served.map_err(|e| DaemonError::Server(e.to_string()))
}

/// Call `job` every `period` until shutdown; each run ends in one audit record
fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
    metrics: Arc<Metrics>,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = InvocationReport> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(timer = name, period_secs = period.as_secs(), "Timer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = job().await;
                    report.emit();
                    metrics.observe(&report);
                }
                _ = shutdown.changed() => {
                    info!(timer = name, "Timer stopping");
                    break;
                }
            }
        }
    })
}

/// One dispatcher task: invoke a worker per envelope. Refused orders are
/// parked in the dead-letter partition; failed invocations are only reported.
async fn dispatch_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<OrderEnvelope>,
    dispatcher: Arc<Dispatcher>,
    queue: FjallQueue,
    metrics: Arc<Metrics>,
) {
    debug!(worker_id, "Dispatcher task started");

    while let Some(envelope) = rx.recv().await {
        let report = match dispatcher.dispatch(&envelope.order).await {
            Ok(target) => InvocationReport::ok(
                "dispatcher",
                format!("{} invoked in {}", target.worker, target.region),
            )
            .with_count("invoked", 1),
            Err(e) => {
                if e.is_refusal() {
                    if let Err(dlq_err) =
                        queue.move_to_dlq(envelope.key, &envelope.order, e.to_string())
                    {
                        error!(seq = envelope.key.seq, error = %dlq_err, "Dead-letter write failed");
                    }
                }
                warn!(
                    worker_id,
                    order_id = %envelope.order.order_id,
                    device_id = %envelope.order.aimpoint.device_id,
                    refused = e.is_refusal(),
                    error = %e,
                    "Dispatch failed"
                );
                InvocationReport::partial("dispatcher", format!("dispatch failed: {e}"))
                    .with_count("invoked", 0)
            }
        };
        report.emit();
        metrics.observe(&report);
    }

    debug!(worker_id, "Dispatcher task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MemoryInvoker;
    use crate::model::{Aimpoint, CollectionType, FetchOrder, OrderOverrides};
    use tempfile::TempDir;

    fn order(regions: &[&str]) -> FetchOrder {
        let aimpoint = Aimpoint::builder()
            .device_id("12")
            .collection_type(CollectionType::Stills)
            .access_url("https://cams.example/12.jpg")
            .poll_frequency(60)
            .filename_base("rdtc{deviceID}")
            .coll_regions(regions.iter().map(|r| r.to_string()).collect())
            .build();
        FetchOrder::new(
            aimpoint,
            OrderOverrides {
                delay_secs: 0,
                tick_ms: 0,
                probe: false,
            },
        )
    }

    #[tokio::test]
    async fn test_worker_invokes_and_parks_refusals() {
        let dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(dir.path()).unwrap();
        let invoker = MemoryInvoker::new();
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(invoker.clone()), &Config::default()).unwrap());
        let metrics = Arc::new(Metrics::new());

        let good = order(&["Europe (Frankfurt)"]);
        let bad = order(&[]);
        queue.enqueue_at(&good, 0).unwrap();
        queue.enqueue_at(&bad, 0).unwrap();

        let (broker, mut receivers) = OrderBroker::new(queue.clone(), 1, 10);
        assert_eq!(broker.pump(1).await.unwrap(), 2);
        drop(broker);

        let rx = receivers.remove(0);
        dispatch_worker(0, rx, dispatcher, queue.clone(), metrics.clone()).await;

        assert_eq!(invoker.calls().len(), 1);
        let dlq = queue.list_dlq(10).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].1.order.order_id, bad.order_id);
        assert_eq!(queue.pending().unwrap(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.orders_dispatched, 1);
        assert_eq!(snapshot.dispatch_failures, 1);
    }

    #[tokio::test]
    async fn test_failed_invocation_consumes_the_order() {
        let dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(dir.path()).unwrap();
        let invoker = MemoryInvoker::rejecting(503);
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(invoker.clone()), &Config::default()).unwrap());
        let metrics = Arc::new(Metrics::new());
        queue.enqueue_at(&order(&["Europe (Frankfurt)"]), 0).unwrap();

        let (broker, mut receivers) = OrderBroker::new(queue.clone(), 1, 10);
        assert_eq!(broker.pump(1).await.unwrap(), 1);
        drop(broker);
        dispatch_worker(0, receivers.remove(0), dispatcher, queue.clone(), metrics.clone()).await;

        // One attempt, no retry, and nothing parked: the platform had its chance
        assert_eq!(invoker.calls().len(), 1);
        assert_eq!(queue.pending().unwrap(), 0);
        assert!(queue.list_dlq(10).unwrap().is_empty());
        assert_eq!(metrics.snapshot().dispatch_failures, 1);
    }

    #[tokio::test]
    async fn test_timer_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let metrics = Arc::new(Metrics::new());

        let handle = spawn_timer(
            "test",
            Duration::from_secs(3600),
            rx,
            || async { InvocationReport::ok("monitor", "tick").with_count("enqueued", 2) },
            metrics.clone(),
        );
        // First interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(metrics.snapshot().orders_enqueued, 2);
    }
}
