//! Dataset management CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use namestats_core::config::AppConfig;
use namestats_core::error::{AppError, ErrorKind};
use namestats_entity::dataset::Dataset;
use namestats_service::{DatasetUploadService, SubmitDatasetParams};
use namestats_storage::LocalStorageProvider;

/// Arguments for dataset commands
#[derive(Debug, Args)]
pub struct DatasetArgs {
    /// Dataset subcommand
    #[command(subcommand)]
    pub command: DatasetCommand,
}

/// Dataset subcommands
#[derive(Debug, Subcommand)]
pub enum DatasetCommand {
    /// Upload a name-count file and enqueue its ingestion
    Submit {
        /// Country code the file belongs to
        #[arg(short, long)]
        country: String,
        /// Path to a .csv or .txt file whose name carries the year (e.g. yob2023.txt)
        file: PathBuf,
        /// Declared content type
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// List datasets
    List {
        /// Only datasets of this country
        #[arg(short, long)]
        country: Option<String>,
        /// Maximum rows
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Show one dataset
    Show {
        /// Dataset ID
        id: Uuid,
    },
    /// Delete a dataset's rows and load it again
    Reprocess {
        /// Dataset ID
        id: Uuid,
    },
    /// Soft-delete a dataset
    Delete {
        /// Dataset ID
        id: Uuid,
    },
}

/// Dataset table row
#[derive(Debug, Serialize, Tabled)]
struct DatasetRow {
    #[tabled(rename = "ID")]
    id: Uuid,
    #[tabled(rename = "Country")]
    country_code: String,
    #[tabled(rename = "File")]
    filename: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Rows")]
    row_count: String,
    #[tabled(rename = "Uploaded")]
    uploaded_at: String,
}

impl From<&Dataset> for DatasetRow {
    fn from(d: &Dataset) -> Self {
        Self {
            id: d.id,
            country_code: d.country_code.clone(),
            filename: d.filename.clone(),
            status: d.status.to_string(),
            row_count: d.row_count.map_or_else(|| "-".to_string(), |n| n.to_string()),
            uploaded_at: d.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Execute dataset commands
pub async fn execute(
    args: &DatasetArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let pool = super::create_db_pool(config).await?;
    let storage = LocalStorageProvider::new(&config.storage.local_root).await?;
    let service = DatasetUploadService::new(
        Arc::new(pool.datasets()),
        Arc::new(pool.jobs()),
        Arc::new(storage),
        config.storage.clone(),
        config.worker.max_attempts,
    );

    match &args.command {
        DatasetCommand::Submit {
            country,
            file,
            mime_type,
        } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| AppError::validation(format!("Invalid file path: {}", file.display())))?
                .to_string();
            let data = tokio::fs::read(file).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to read {}", file.display()),
                    e,
                )
            })?;

            let submitted = service
                .submit(SubmitDatasetParams {
                    country_code: country.clone(),
                    filename,
                    mime_type: mime_type.clone(),
                    data: Bytes::from(data),
                    uploaded_by: None,
                })
                .await?;

            output::print_success(&format!(
                "Dataset {} submitted (job: {})",
                submitted.dataset.id, submitted.job.id
            ));
        }
        DatasetCommand::List { country, limit } => {
            let datasets = service.list(country.as_deref(), *limit).await?;
            let rows: Vec<DatasetRow> = datasets.iter().map(DatasetRow::from).collect();
            output::print_list(&rows, format);
        }
        DatasetCommand::Show { id } => {
            let dataset = service.find(*id).await?;
            output::print_item(&dataset, format);
        }
        DatasetCommand::Reprocess { id } => {
            let job = service.request_reprocess(*id).await?;
            output::print_success(&format!("Reprocess of {} enqueued (job: {})", id, job.id));
        }
        DatasetCommand::Delete { id } => {
            service.soft_delete(*id).await?;
            output::print_success(&format!("Dataset {} deleted", id));
        }
    }

    pool.close().await;
    Ok(())
}
