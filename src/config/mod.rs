//! Runtime settings
//!
//! Every value has a struct default. A TOML file, `.env` and
//! `HIGHWAYPATROL__<SECTION>__<KEY>` variables are layered on top, in that
//! order, and the merged result is checked before anything starts:
//!
//! ```no_run
//! use highwaypatrol::config::Config;
//!
//! let config = Config::load()?;
//! let ticks_per_hour = 60 / config.scheduler.system_periodicity;
//! # Ok::<(), highwaypatrol::config::ConfigError>(())
//! ```
//!
//! `HIGHWAYPATROL_CONFIG` picks the file (default `config/highwaypatrol.toml`).
//! Storage credentials never live in the file; see `S3_ACCESS_KEY` and
//! `S3_SECRET_KEY` (or their `AWS_*` equivalents).

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DebugConfig, DeadlineConfig, DispatchConfig, LifecycleConfig, Mode, QueueConfig,
    SchedulerConfig, ServerConfig, StorageConfig, StorageProvider,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Merge the default file location with the environment, then validate
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(sources::default_path())
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let merged = sources::load_from_sources(path)?;
        validation::validate(&merged)?;
        Ok(merged)
    }
}
