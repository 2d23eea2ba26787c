//! Store traits the ingestion pipeline is written against.
//!
//! The PostgreSQL repositories in [`crate::repositories`] are the
//! production implementations; [`crate::memory::MemoryStore`] implements
//! all three for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use namestats_core::result::AppResult;
use namestats_entity::dataset::{CreateDataset, Dataset, DatasetStatus};
use namestats_entity::job::{CreateJob, Job, JobStatus};
use namestats_entity::record::NameRecord;

/// Error recorded on jobs and datasets whose worker lock went stale.
pub const STALE_LOCK_ERROR: &str = "Worker lock expired";

/// Durable job queue persistence.
///
/// `complete`, `fail` and `retry` only move jobs out of `running`, and only
/// for the worker currently holding the lock. Re-applying one of them to a
/// job that is already in the resulting state succeeds without changing it.
/// Any other starting state, or a lock held by another worker, is a conflict.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a job in `queued` state with zero attempts.
    async fn create(&self, data: &CreateJob) -> AppResult<Job>;

    /// Find a job by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Jobs referencing a dataset, newest first.
    async fn find_by_dataset(&self, dataset_id: Uuid) -> AppResult<Vec<Job>>;

    /// Atomically lock the oldest eligible job for `worker_id`.
    ///
    /// Eligible: `queued`, `next_retry_at` unset or due, attempts left, and
    /// dataset (if any) not soft-deleted. The returned job is `running` with
    /// its attempt counter already incremented.
    async fn lock_next(&self, worker_id: &str) -> AppResult<Option<Job>>;

    /// Mark a job running under `worker_id` completed.
    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()>;

    /// Mark a job running under `worker_id` permanently failed.
    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> AppResult<()>;

    /// Return a job running under `worker_id` to the queue, due again at
    /// `next_retry_at`.
    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Release jobs whose lock was taken before `locked_before`.
    ///
    /// Jobs with attempts left go back to `queued`. The rest are failed and
    /// their live datasets marked `failed` with [`STALE_LOCK_ERROR`].
    /// Returns the number of jobs touched.
    async fn release_stale(&self, locked_before: DateTime<Utc>) -> AppResult<u64>;

    /// Atomically mark a live dataset `reprocessing` and enqueue its
    /// `reprocess_dataset` job.
    ///
    /// Not-found if the dataset is missing or deleted; conflict if it
    /// already has a queued or running job.
    async fn enqueue_reprocess(&self, dataset_id: Uuid, max_attempts: i32) -> AppResult<Job>;

    /// Count jobs in a status.
    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64>;
}

/// Dataset metadata persistence. Soft-deleted datasets are invisible to
/// every read.
#[async_trait]
pub trait DatasetStore: Send + Sync + std::fmt::Debug + 'static {
    /// Register an uploaded dataset in `pending` state.
    async fn create(&self, data: &CreateDataset) -> AppResult<Dataset>;

    /// Find a live dataset by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Dataset>>;

    /// Live datasets, newest first, optionally for one country.
    async fn list(&self, country_code: Option<&str>, limit: i64) -> AppResult<Vec<Dataset>>;

    /// Enter `processing` or `reprocessing`, clearing row count and error.
    async fn mark_in_progress(&self, id: Uuid, status: DatasetStatus) -> AppResult<()>;

    /// Enter `completed` with the loaded row count.
    async fn mark_completed(&self, id: Uuid, row_count: i64) -> AppResult<()>;

    /// Enter `failed`, overwriting any previous error.
    async fn mark_failed(&self, id: Uuid, error: &str) -> AppResult<()>;

    /// Set the soft-delete marker. Returns `false` if already deleted or missing.
    async fn soft_delete(&self, id: Uuid) -> AppResult<bool>;
}

/// Permanent name-count storage.
#[async_trait]
pub trait NameCountStore: Send + Sync + std::fmt::Debug + 'static {
    /// Persist one batch all-or-nothing. Returns rows inserted.
    ///
    /// The whole batch is rejected if any row has an empty name, a gender
    /// outside `M`/`F`, or a non-positive count.
    async fn insert_batch(
        &self,
        dataset_id: Uuid,
        country_code: &str,
        records: &[NameRecord],
    ) -> AppResult<u64>;

    /// Delete every row loaded from a dataset. Returns rows deleted.
    async fn delete_by_dataset(&self, dataset_id: Uuid) -> AppResult<u64>;

    /// Count rows loaded from a dataset.
    async fn count_by_dataset(&self, dataset_id: Uuid) -> AppResult<i64>;
}

/// Validation shared by every `insert_batch` implementation's staging check.
pub fn invalid_row_reason(record: &NameRecord) -> Option<&'static str> {
    if record.name.trim().is_empty() {
        Some("empty name")
    } else if record.gender != "M" && record.gender != "F" {
        Some("gender outside M/F")
    } else if record.count <= 0 {
        Some("non-positive count")
    } else {
        None
    }
}
