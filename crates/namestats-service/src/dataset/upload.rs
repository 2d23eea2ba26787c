//! Dataset upload service. Accepts files and schedules their ingestion.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use namestats_core::config::StorageConfig;
use namestats_core::error::AppError;
use namestats_core::traits::storage::StorageProvider;
use namestats_database::{DatasetStore, JobStore};
use namestats_entity::dataset::{CreateDataset, Dataset};
use namestats_entity::job::{CreateJob, Job, JobPayload};

/// Accepted file extensions.
const ALLOWED_EXTENSIONS: &[&str] = &["csv", "txt"];

/// Accepted declared MIME types.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/csv",
    "application/vnd.ms-excel",
];

/// Upload parameters (single request with the full file body).
#[derive(Debug, Clone)]
pub struct SubmitDatasetParams {
    /// Country the file belongs to.
    pub country_code: String,
    /// Original file name; the data year is read from it.
    pub filename: String,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// File content bytes.
    pub data: Bytes,
    /// Uploading user, if known.
    pub uploaded_by: Option<Uuid>,
}

/// A stored dataset and the job that will ingest it.
#[derive(Debug, Clone)]
pub struct SubmittedDataset {
    /// The new dataset, in `pending` state.
    pub dataset: Dataset,
    /// Its `parse_dataset` job.
    pub job: Job,
}

/// Accepts uploads, creates datasets and enqueues ingestion jobs.
#[derive(Debug, Clone)]
pub struct DatasetUploadService {
    /// Dataset persistence.
    datasets: Arc<dyn DatasetStore>,
    /// Job persistence.
    jobs: Arc<dyn JobStore>,
    /// Uploaded file storage.
    storage: Arc<dyn StorageProvider>,
    /// Storage configuration.
    config: StorageConfig,
    /// Attempts granted to new jobs.
    max_attempts: i32,
}

impl DatasetUploadService {
    /// Creates a new upload service.
    pub fn new(
        datasets: Arc<dyn DatasetStore>,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn StorageProvider>,
        config: StorageConfig,
        max_attempts: i32,
    ) -> Self {
        Self {
            datasets,
            jobs,
            storage,
            config,
            max_attempts,
        }
    }

    /// Store an uploaded file, register it, and enqueue its ingestion.
    ///
    /// If enqueueing fails the dataset stays `pending` and the error is
    /// returned.
    pub async fn submit(&self, params: SubmitDatasetParams) -> Result<SubmittedDataset, AppError> {
        let country_code = normalize_country_code(&params.country_code)?;
        self.check_upload(&params)?;

        let file_path = self
            .storage
            .save(&country_code, &params.filename, params.data.clone())
            .await?;

        let dataset = match self
            .datasets
            .create(&CreateDataset {
                country_code: country_code.clone(),
                filename: params.filename.clone(),
                file_path: file_path.clone(),
                file_size: params.data.len() as i64,
                uploaded_by: params.uploaded_by,
            })
            .await
        {
            Ok(dataset) => dataset,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&file_path).await {
                    warn!(path = %file_path, error = %cleanup, "Failed to remove orphaned upload");
                }
                return Err(e);
            }
        };

        let job = self
            .jobs
            .create(&CreateJob::for_payload(
                JobPayload::ParseDataset {
                    dataset_id: dataset.id,
                },
                self.max_attempts,
            ))
            .await
            .inspect_err(|e| {
                warn!(dataset_id = %dataset.id, error = %e, "Dataset stored but ingestion was not enqueued");
            })?;

        info!(
            dataset_id = %dataset.id,
            job_id = %job.id,
            country_code = %dataset.country_code,
            filename = %dataset.filename,
            bytes = dataset.file_size,
            "Dataset submitted"
        );
        Ok(SubmittedDataset { dataset, job })
    }

    /// Schedule a dataset to be cleared and loaded again.
    ///
    /// The status change and the enqueue commit together, and a dataset with
    /// a queued or running job is refused with a conflict.
    pub async fn request_reprocess(&self, dataset_id: Uuid) -> Result<Job, AppError> {
        let job = self
            .jobs
            .enqueue_reprocess(dataset_id, self.max_attempts)
            .await?;

        info!(%dataset_id, job_id = %job.id, "Reprocess requested");
        Ok(job)
    }

    /// Hide a dataset from every read and from the job queue.
    pub async fn soft_delete(&self, dataset_id: Uuid) -> Result<(), AppError> {
        if !self.datasets.soft_delete(dataset_id).await? {
            return Err(AppError::not_found(format!("Dataset {dataset_id} not found")));
        }
        info!(%dataset_id, "Dataset deleted");
        Ok(())
    }

    /// Find a live dataset.
    pub async fn find(&self, dataset_id: Uuid) -> Result<Dataset, AppError> {
        self.datasets
            .find_by_id(dataset_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Dataset {dataset_id} not found")))
    }

    /// Live datasets, newest first.
    pub async fn list(&self, country_code: Option<&str>, limit: i64) -> Result<Vec<Dataset>, AppError> {
        let country_code = country_code.map(normalize_country_code).transpose()?;
        self.datasets.list(country_code.as_deref(), limit).await
    }

    fn check_upload(&self, params: &SubmitDatasetParams) -> Result<(), AppError> {
        // Check size limit
        if params.data.is_empty() {
            return Err(AppError::validation("Uploaded file is empty"));
        }
        if params.data.len() as u64 > self.config.max_upload_bytes {
            return Err(AppError::validation(format!(
                "File exceeds maximum upload size of {} bytes",
                self.config.max_upload_bytes
            )));
        }

        let extension = params
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::validation(format!(
                "Unsupported file type '{}': expected .csv or .txt",
                params.filename
            )));
        }

        if let Some(mime) = &params.mime_type {
            let essence = mime
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !ALLOWED_MIME_TYPES.contains(&essence.as_str()) {
                return Err(AppError::validation(format!(
                    "Unsupported content type '{mime}'"
                )));
            }
        }
        Ok(())
    }
}

fn normalize_country_code(raw: &str) -> Result<String, AppError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() < 2 || code.len() > 8 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::validation(format!("Invalid country code '{raw}'")));
    }
    Ok(code)
}
