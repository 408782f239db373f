mod cli;

use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use highwaypatrol::config::Config;
use highwaypatrol::daemon;
use highwaypatrol::dispatch::{Dispatcher, HttpInvoker};
use highwaypatrol::history::HistoryLog;
use highwaypatrol::lifecycle::{Disabler, Enabler};
use highwaypatrol::messaging::{DispatchProducer, MemoryBus};
use highwaypatrol::model::{FetchOrder, OutcomeMessage};
use highwaypatrol::observability::InvocationReport;
use highwaypatrol::queue::FjallQueue;
use highwaypatrol::scheduler::Monitor;
use highwaypatrol::selfcheck;
use highwaypatrol::storage::StorageClient;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<ExitCode, AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    info!(mode = ?config.mode, bucket = %config.storage.bucket, "Configuration loaded");

    let report = match cli.command {
        Commands::Serve => {
            daemon::run(config, false).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Run => {
            daemon::run(config, true).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Monitor(args) => {
            let now = args.tick.now.unwrap_or_else(Utc::now);
            let storage = StorageClient::from_config(&config)?;
            if args.dry_run {
                let bus = MemoryBus::new();
                let report = Monitor::new(storage, Arc::new(bus.clone()), &config)
                    .run(now, config.deadlines.monitor())
                    .await;
                for sent in bus.sent() {
                    println!("{}", serde_json::to_string(&sent.order)?);
                }
                report
            } else {
                // The daemon holds the queue lock; one-shot ticks run while it is stopped
                let queue = FjallQueue::open(&config.queue.path)?;
                let producer: Arc<dyn DispatchProducer> = Arc::new(queue.clone());
                let report = Monitor::new(storage, producer, &config)
                    .run(now, config.deadlines.monitor())
                    .await;
                queue.flush()?;
                report
            }
        }
        Commands::Disable(args) => {
            let storage = StorageClient::from_config(&config)?;
            Disabler::new(storage, &config)
                .run(args.now.unwrap_or_else(Utc::now), config.deadlines.lifecycle())
                .await
        }
        Commands::Enable(args) => {
            let storage = StorageClient::from_config(&config)?;
            Enabler::new(storage, &config)
                .run(args.now.unwrap_or_else(Utc::now), config.deadlines.lifecycle())
                .await
        }
        Commands::Dispatch(args) => {
            selfcheck::run(&config.dispatch).await;
            let bytes = tokio::fs::read(&args.file).await?;
            let order = FetchOrder::from_json(&bytes)?;
            let invoker = HttpInvoker::from_config(&config.dispatch, config.deadlines.dispatch())?;
            Dispatcher::new(Arc::new(invoker), &config)?
                .run(&order)
                .await
        }
        Commands::Record(args) => {
            let bytes = tokio::fs::read(&args.file).await?;
            let message: OutcomeMessage = serde_json::from_slice(&bytes)?;
            message.aimpoint.validate()?;
            let storage = StorageClient::from_config(&config)?;
            let sent_ms = args.sent_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
            HistoryLog::new(storage)
                .run(&message, sent_ms, config.deadlines.record())
                .await
        }
    };

    Ok(finish(report)?)
}

/// Emit the audit record, print it, and map its status to the exit code
fn finish(report: InvocationReport) -> serde_json::Result<ExitCode> {
    report.emit();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.status {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
