use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "highwaypatrol")]
#[command(about = "Aimpoint lifecycle control plane", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides HIGHWAYPATROL_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scheduler tick
    Monitor(MonitorArgs),
    /// Run one disabler sweep
    Disable(TickArgs),
    /// Run one enabler sweep
    Enable(TickArgs),
    /// Invoke a worker for one fetch order read from a JSON file
    Dispatch(DispatchArgs),
    /// Record one outcome message read from a JSON file
    Record(RecordArgs),
    /// Serve the event surface and drain the local dispatch queue
    Serve,
    /// Like `serve`, plus internal timers for every periodic component
    Run,
}

#[derive(clap::Args, Debug)]
pub struct TickArgs {
    /// Logical tick time (RFC 3339); defaults to now
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub tick: TickArgs,

    /// Print the orders instead of enqueueing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct DispatchArgs {
    /// FetchOrder JSON
    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct RecordArgs {
    /// OutcomeMessage JSON
    pub file: PathBuf,

    /// Send timestamp in epoch millis; defaults to now
    #[arg(long)]
    pub sent_ms: Option<i64>,
}
