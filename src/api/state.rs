use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::history::HistoryLog;
use crate::lifecycle::{Disabler, Enabler};
use crate::messaging::DispatchProducer;
use crate::observability::Metrics;
use crate::queue::FjallQueue;
use crate::scheduler::Monitor;
use crate::storage::StorageClient;

/// Everything a handler can reach. Components are built once and shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub history: HistoryLog,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<Monitor>,
    pub disabler: Arc<Disabler>,
    pub enabler: Arc<Enabler>,
    pub metrics: Arc<Metrics>,
    /// Present when orders go through the local delayed queue
    pub queue: Option<FjallQueue>,
}

impl AppState {
    pub fn new(
        config: Config,
        storage: StorageClient,
        producer: Arc<dyn DispatchProducer>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            history: HistoryLog::new(storage.clone()),
            monitor: Arc::new(Monitor::new(storage.clone(), producer, &config)),
            disabler: Arc::new(Disabler::new(storage.clone(), &config)),
            enabler: Arc::new(Enabler::new(storage, &config)),
            config: Arc::new(config),
            dispatcher,
            metrics,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: FjallQueue) -> Self {
        self.queue = Some(queue);
        self
    }
}
