//! Scheduler (monitor): turns the collectible set into delayed fetch orders

pub mod cadence;
pub mod hours;
pub mod monitor;

use thiserror::Error;

use crate::storage::StorageError;

pub use cadence::{Cadence, Step, fetch_delays};
pub use monitor::{Monitor, TickSummary, select_probes};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("failed to enumerate aimpoints: {0}")]
    Enumeration(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
