//! Worker queue CLI commands.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use namestats_core::config::AppConfig;
use namestats_core::error::AppError;
use namestats_worker::JobQueue;

/// Arguments for worker commands
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker subcommand
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Show queue status
    Status,
    /// Return jobs locked for too long to the queue
    ReleaseStale {
        /// Lock age in seconds (defaults to worker.stale_lock_seconds)
        #[arg(long)]
        older_than: Option<u64>,
    },
}

/// Execute worker commands
pub async fn execute(
    args: &WorkerArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let pool = super::create_db_pool(config).await?;
    let queue = JobQueue::new(
        Arc::new(pool.jobs()),
        config.worker.max_attempts,
    );

    match &args.command {
        WorkerCommand::Status => {
            let stats = queue.stats().await?;
            match format {
                OutputFormat::Json => output::print_item(&stats, format),
                OutputFormat::Table => {
                    println!("Worker Queue Status:");
                    output::print_kv("Queued", &stats.queued.to_string());
                    output::print_kv("Running", &stats.running.to_string());
                    output::print_kv("Completed", &stats.completed.to_string());
                    output::print_kv("Failed", &stats.failed.to_string());
                    output::print_kv("Worker Enabled", &config.worker.enabled.to_string());
                    output::print_kv("Concurrency", &config.worker.concurrency.to_string());
                }
            }
        }
        WorkerCommand::ReleaseStale { older_than } => {
            let age = older_than.unwrap_or(config.worker.stale_lock_seconds);
            let released = queue.release_stale(Duration::from_secs(age)).await?;
            if released == 0 {
                output::print_info("No stale jobs found.");
            } else {
                output::print_success(&format!("Released {} stale job(s)", released));
            }
        }
    }

    pool.close().await;
    Ok(())
}
