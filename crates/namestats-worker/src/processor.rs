//! Per-job dataset processing: resolve, load, validate, parse and insert,
//! then settle the job and dataset.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use namestats_core::config::NormalizerConfig;
use namestats_core::error::{AppError, ErrorKind};
use namestats_core::result::AppResult;
use namestats_core::traits::storage::StorageProvider;
use namestats_database::{DatasetStore, NameCountStore};
use namestats_entity::dataset::{Dataset, DatasetStatus};
use namestats_entity::job::{Job, JobPayload};
use namestats_ingest::filename::extract_year;
use namestats_ingest::{BatchInserter, IngestError, ParseContext, ParserRegistry};

use crate::queue::JobQueue;
use crate::retry::RetryPolicy;

/// What happened to a job after one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The dataset loaded and the job is completed.
    Completed {
        /// Rows inserted.
        rows: u64,
    },
    /// The attempt failed and the job is queued again.
    Retrying {
        /// Error recorded on the job.
        error: String,
    },
    /// The job is permanently failed.
    Failed {
        /// Error recorded on the job and dataset.
        error: String,
    },
}

/// Stores and services a [`DatasetProcessor`] works against.
#[derive(Debug, Clone)]
pub struct ProcessorDeps {
    /// Queue jobs are settled through.
    pub queue: JobQueue,
    /// Dataset status persistence.
    pub datasets: Arc<dyn DatasetStore>,
    /// Name-count row persistence.
    pub counts: Arc<dyn NameCountStore>,
    /// Uploaded file storage.
    pub storage: Arc<dyn StorageProvider>,
    /// Parsers by country code.
    pub registry: Arc<ParserRegistry>,
}

/// Runs ingestion jobs end to end.
#[derive(Debug, Clone)]
pub struct DatasetProcessor {
    queue: JobQueue,
    datasets: Arc<dyn DatasetStore>,
    inserter: BatchInserter,
    counts: Arc<dyn NameCountStore>,
    storage: Arc<dyn StorageProvider>,
    registry: Arc<ParserRegistry>,
    limits: NormalizerConfig,
    retry: RetryPolicy,
}

impl DatasetProcessor {
    /// Create a processor over `deps`, inserting `batch_size` rows per batch.
    pub fn new(
        deps: ProcessorDeps,
        limits: NormalizerConfig,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue: deps.queue,
            datasets: deps.datasets,
            inserter: BatchInserter::new(Arc::clone(&deps.counts), batch_size),
            counts: deps.counts,
            storage: deps.storage,
            registry: deps.registry,
            limits,
            retry,
        }
    }

    /// The queue jobs are settled through.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Process one locked job and record the outcome.
    ///
    /// The job is settled as its current lock holder, so a worker whose lock
    /// was released and taken over gets a conflict instead of overwriting
    /// the new holder. Only failures to record the outcome itself are
    /// returned as errors.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, attempt = job.attempts))]
    pub async fn process(&self, job: &Job, cancel: &CancellationToken) -> AppResult<ProcessOutcome> {
        let worker_id = job
            .locked_by
            .as_deref()
            .ok_or_else(|| AppError::conflict(format!("Job {} is not locked", job.id)))?;

        let started = std::time::Instant::now();
        match self.execute(job, cancel).await {
            Ok(result) => {
                let rows = result["rows_processed"].as_u64().unwrap_or(0);
                self.queue.complete(job.id, worker_id, Some(&result)).await?;
                info!(
                    rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Dataset loaded"
                );
                Ok(ProcessOutcome::Completed { rows })
            }
            Err(e) => self.settle_failure(job, worker_id, e).await,
        }
    }

    async fn settle_failure(
        &self,
        job: &Job,
        worker_id: &str,
        err: IngestError,
    ) -> AppResult<ProcessOutcome> {
        let message = err.to_string();

        if err.is_retryable() && job.has_attempts_remaining() {
            let next_retry_at = match err {
                IngestError::Cancelled => Utc::now(),
                _ => self.retry.next_retry_at(Utc::now(), job.attempts),
            };
            warn!(
                error = %message,
                code = err.code(),
                %next_retry_at,
                "Attempt failed, job requeued"
            );
            self.queue
                .retry(job.id, worker_id, &message, next_retry_at)
                .await?;
            return Ok(ProcessOutcome::Retrying { error: message });
        }

        error!(error = %message, code = err.code(), "Job failed permanently");
        self.queue.fail(job.id, worker_id, &message).await?;
        if let Some(dataset_id) = job.dataset_id {
            match self.datasets.mark_failed(dataset_id, &message).await {
                Ok(()) => {}
                Err(e) if e.is(ErrorKind::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ProcessOutcome::Failed { error: message })
    }

    async fn execute(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, IngestError> {
        let payload = job
            .typed_payload()
            .map_err(|e| IngestError::InvalidPayload(e.message))?;
        let dataset = self.resolve_dataset(payload.dataset_id()).await?;

        let status = match payload {
            JobPayload::ParseDataset { .. } => DatasetStatus::Processing,
            JobPayload::ReprocessDataset { .. } => DatasetStatus::Reprocessing,
        };
        // Every attempt starts from an empty slate, so rows committed by an
        // earlier attempt or load are never duplicated.
        let cleared = self
            .counts
            .delete_by_dataset(dataset.id)
            .await
            .map_err(IngestError::Database)?;
        self.datasets
            .mark_in_progress(dataset.id, status)
            .await
            .map_err(database_or_missing(dataset.id))?;
        if cleared > 0 {
            info!(dataset_id = %dataset.id, cleared, "Removed previously loaded rows");
        }

        let parser = self.registry.resolve(&dataset.country_code)?;
        let year = extract_year(&dataset.filename, &self.limits)?;
        let ctx = ParseContext {
            year,
            dataset_id: dataset.id,
            country_code: dataset.country_code.clone(),
            cancel: cancel.clone(),
        };

        let stream = self.open(&dataset).await?;
        parser.validate(&ctx, stream).await?;

        let stream = self.open(&dataset).await?;
        let rows = self
            .inserter
            .run(&dataset, parser.parse(&ctx, stream), cancel)
            .await?;

        self.datasets
            .mark_completed(dataset.id, rows as i64)
            .await
            .map_err(database_or_missing(dataset.id))?;

        Ok(json!({
            "rows_processed": rows,
            "year": year,
            "parser": parser.metadata().source_id,
        }))
    }

    async fn resolve_dataset(&self, id: Uuid) -> Result<Dataset, IngestError> {
        self.datasets
            .find_by_id(id)
            .await
            .map_err(IngestError::Database)?
            .ok_or(IngestError::DatasetNotFound(id))
    }

    async fn open(
        &self,
        dataset: &Dataset,
    ) -> Result<namestats_core::traits::storage::ByteStream, IngestError> {
        self.storage
            .load(&dataset.file_path)
            .await
            .map_err(IngestError::Storage)
    }
}

/// A dataset deleted mid-run surfaces as not-found from its updates.
fn database_or_missing(
    id: Uuid,
) -> impl Fn(AppError) -> IngestError {
    move |e| {
        if e.is(ErrorKind::NotFound) {
            IngestError::DatasetNotFound(id)
        } else {
            IngestError::Database(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use namestats_core::config::{IngestConfig, RetryStrategy};
    use namestats_database::{JobStore, MemoryStore};
    use namestats_entity::dataset::CreateDataset;
    use namestats_entity::job::JobStatus;
    use namestats_storage::MemoryStorageProvider;

    use super::*;

    const THREE_LINES: &str = "Olivia,F,15\nLiam,M,20\nEmma,F,10\n";

    struct Harness {
        store: Arc<MemoryStore>,
        storage: Arc<MemoryStorageProvider>,
        processor: DatasetProcessor,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let storage = Arc::new(MemoryStorageProvider::with_chunk_size(7));
            let config = IngestConfig::default();
            let registry = Arc::new(ParserRegistry::with_builtin(&config).unwrap());
            let processor = DatasetProcessor::new(
                ProcessorDeps {
                    queue: JobQueue::new(store.clone(), 3),
                    datasets: store.clone(),
                    counts: store.clone(),
                    storage: storage.clone(),
                    registry,
                },
                config.normalizer.clone(),
                2,
                RetryPolicy::new(RetryStrategy::Fixed, Duration::ZERO, Duration::ZERO),
            );
            Self {
                store,
                storage,
                processor,
            }
        }

        async fn upload(&self, country: &str, filename: &str, content: Option<&str>) -> Dataset {
            let file_path = match content {
                Some(text) => self
                    .storage
                    .save(country, filename, Bytes::from(text.to_string()))
                    .await
                    .unwrap(),
                None => format!("{country}/missing-{filename}"),
            };
            DatasetStore::create(
                self.store.as_ref(),
                &CreateDataset {
                    country_code: country.to_string(),
                    filename: filename.to_string(),
                    file_path,
                    file_size: content.map_or(0, |c| c.len() as i64),
                    uploaded_by: None,
                },
            )
            .await
            .unwrap()
        }

        async fn enqueue(&self, payload: JobPayload) -> Job {
            self.processor.queue().enqueue(payload).await.unwrap()
        }

        async fn run_next(&self, cancel: &CancellationToken) -> ProcessOutcome {
            let job = self.store.lock_next("test-worker").await.unwrap().unwrap();
            self.processor.process(&job, cancel).await.unwrap()
        }

        async fn job(&self, id: Uuid) -> Job {
            JobStore::find_by_id(self.store.as_ref(), id).await.unwrap().unwrap()
        }

        fn dataset(&self, id: Uuid) -> Dataset {
            self.store.dataset_raw(id).unwrap()
        }
    }

    #[tokio::test]
    async fn test_three_line_file_loads() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;

        let outcome = h.run_next(&CancellationToken::new()).await;
        assert_eq!(outcome, ProcessOutcome::Completed { rows: 3 });

        let job = h.job(job.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.result,
            Some(json!({ "rows_processed": 3, "year": 2023, "parser": "US" }))
        );
        assert!(job.locked_by.is_none());

        let dataset = h.dataset(dataset.id);
        assert_eq!(dataset.status, DatasetStatus::Completed);
        assert_eq!(dataset.row_count, Some(3));
        assert!(dataset.error_message.is_none());
        assert!(dataset.processed_at.is_some());

        let rows = h.store.rows_for(dataset.id);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.record.year == 2023 && r.country_code == "US"));
        assert_eq!(rows[1].record.name, "Liam");
    }

    #[tokio::test]
    async fn test_transient_failure_retries_until_exhausted() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", None).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;
        let cancel = CancellationToken::new();

        for attempt in 1..=2 {
            assert!(matches!(
                h.run_next(&cancel).await,
                ProcessOutcome::Retrying { .. }
            ));
            let job = h.job(job.id).await;
            assert_eq!(job.status, JobStatus::Queued);
            assert_eq!(job.attempts, attempt);
            assert!(job.last_error.is_some());
            assert!(job.next_retry_at.is_some());
            assert_eq!(h.dataset(dataset.id).status, DatasetStatus::Processing);
        }

        assert!(matches!(
            h.run_next(&cancel).await,
            ProcessOutcome::Failed { .. }
        ));
        let job = h.job(job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);

        let dataset = h.dataset(dataset.id);
        assert_eq!(dataset.status, DatasetStatus::Failed);
        assert_eq!(dataset.error_message, job.last_error);
        assert!(h.store.lock_next("test-worker").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_errors_fail_without_retry() {
        let h = Harness::new();
        let cancel = CancellationToken::new();

        let no_year = h.upload("US", "report.csv", Some(THREE_LINES)).await;
        let no_parser = h.upload("ZZ", "yob2023.txt", Some(THREE_LINES)).await;
        let bad_line = h
            .upload("US", "yob2020.txt", Some("Ava,F,3\nNoah,M,lots\n"))
            .await;

        for (dataset, needle) in [
            (&no_year, "report.csv"),
            (&no_parser, "ZZ"),
            (&bad_line, "line 2"),
        ] {
            let job = h
                .enqueue(JobPayload::ParseDataset {
                    dataset_id: dataset.id,
                })
                .await;
            match h.run_next(&cancel).await {
                ProcessOutcome::Failed { error } => assert!(error.contains(needle), "{error}"),
                other => panic!("unexpected outcome {other:?}"),
            }
            let job = h.job(job.id).await;
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.attempts, 1);
            assert_eq!(h.dataset(dataset.id).status, DatasetStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_reprocess_replaces_rows() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;

        h.enqueue(JobPayload::ParseDataset {
            dataset_id: dataset.id,
        })
        .await;
        h.run_next(&cancel).await;

        h.enqueue(JobPayload::ReprocessDataset {
            dataset_id: dataset.id,
        })
        .await;
        assert_eq!(
            h.run_next(&cancel).await,
            ProcessOutcome::Completed { rows: 3 }
        );
        assert_eq!(h.store.rows_for(dataset.id).len(), 3);
        assert_eq!(h.dataset(dataset.id).row_count, Some(3));
    }

    #[tokio::test]
    async fn test_cancellation_requeues_job() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            h.run_next(&cancel).await,
            ProcessOutcome::Retrying { .. }
        ));

        let job = h.job(job.id).await;
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.last_error.as_deref(), Some("Processing cancelled"));
        assert_eq!(h.store.count_by_dataset(dataset.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleted_dataset_fails_job() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;
        let locked = h.store.lock_next("test-worker").await.unwrap().unwrap();
        h.store.soft_delete(dataset.id).await.unwrap();

        let outcome = h
            .processor
            .process(&locked, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { .. }));
        assert_eq!(h.job(job.id).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_superseded_worker_cannot_settle() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;

        let stale = h.store.lock_next("w-old").await.unwrap().unwrap();
        h.store
            .release_stale(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        h.store.lock_next("w-new").await.unwrap().unwrap();

        let err = h
            .processor
            .process(&stale, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let job = h.job(job.id).await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.locked_by.as_deref(), Some("w-new"));
    }

    #[tokio::test]
    async fn test_unlocked_job_is_refused() {
        let h = Harness::new();
        let dataset = h.upload("US", "yob2023.txt", Some(THREE_LINES)).await;
        let job = h
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await;

        let err = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(h.dataset(dataset.id).status, DatasetStatus::Pending);
    }
}
