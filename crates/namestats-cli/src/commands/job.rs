//! Job inspection CLI commands.

use std::sync::Arc;

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use namestats_core::config::AppConfig;
use namestats_core::error::AppError;
use namestats_service::{JobStatusService, JobStatusView};

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobArgs {
    /// Job subcommand
    #[command(subcommand)]
    pub command: JobCommand,
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Show the status of one job
    Status {
        /// Job ID
        id: Uuid,
    },
    /// List the jobs of a dataset
    List {
        /// Dataset ID
        #[arg(short, long)]
        dataset: Uuid,
    },
}

/// Job table row
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: Uuid,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Duration (ms)")]
    duration_ms: String,
    #[tabled(rename = "Last error")]
    last_error: String,
}

impl From<&JobStatusView> for JobRow {
    fn from(v: &JobStatusView) -> Self {
        Self {
            id: v.id,
            job_type: v.job_type.to_string(),
            status: v.status.to_string(),
            attempts: format!("{}/{}", v.attempts, v.max_attempts),
            duration_ms: v
                .processing_duration_ms
                .map_or_else(|| "-".to_string(), |ms| ms.to_string()),
            last_error: v.last_error.clone().unwrap_or_default(),
        }
    }
}

/// Execute job commands
pub async fn execute(
    args: &JobArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let pool = super::create_db_pool(config).await?;
    let service = JobStatusService::new(Arc::new(pool.jobs()));

    match &args.command {
        JobCommand::Status { id } => {
            let view = service.get(*id).await?;
            output::print_item(&view, format);
        }
        JobCommand::List { dataset } => {
            let views = service.for_dataset(*dataset).await?;
            let rows: Vec<JobRow> = views.iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }
    }

    pool.close().await;
    Ok(())
}
