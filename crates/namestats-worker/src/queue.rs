//! Job queue abstraction for enqueuing and locking ingestion jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use namestats_core::error::AppError;
use namestats_database::JobStore;
use namestats_entity::job::{CreateJob, Job, JobPayload, JobStatus};

/// Job queue over a [`JobStore`].
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Backing persistence
    store: Arc<dyn JobStore>,
    /// Attempts granted to new jobs
    max_attempts: i32,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(store: Arc<dyn JobStore>, max_attempts: i32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Enqueue a new job for a payload
    pub async fn enqueue(&self, payload: JobPayload) -> Result<Job, AppError> {
        let job = self
            .store
            .create(&CreateJob::for_payload(payload, self.max_attempts))
            .await?;

        tracing::debug!(
            "Enqueued job: id={}, type='{}', dataset={:?}",
            job.id,
            job.job_type,
            job.dataset_id
        );
        Ok(job)
    }

    /// Lock the next eligible job for a worker
    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>, AppError> {
        let job = self.store.lock_next(worker_id).await?;
        if let Some(job) = &job {
            tracing::debug!(
                "Dequeued job: id={}, type='{}', attempt={}/{}, worker='{}'",
                job.id,
                job.job_type,
                job.attempts,
                job.max_attempts,
                worker_id
            );
        }
        Ok(job)
    }

    /// Mark a job held by `worker_id` as completed successfully
    pub async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Option<&serde_json::Value>,
    ) -> Result<(), AppError> {
        self.store.complete(job_id, worker_id, result).await?;
        tracing::debug!("Job completed: id={}, worker='{}'", job_id, worker_id);
        Ok(())
    }

    /// Mark a job held by `worker_id` as permanently failed
    pub async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<(), AppError> {
        self.store.fail(job_id, worker_id, error).await?;
        tracing::debug!("Job failed: id={}, error='{}'", job_id, error);
        Ok(())
    }

    /// Put a job held by `worker_id` back in the queue, due at `next_retry_at`
    pub async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.store.retry(job_id, worker_id, error, next_retry_at).await?;
        tracing::debug!("Job requeued: id={}, next_retry_at={}", job_id, next_retry_at);
        Ok(())
    }

    /// Release jobs locked longer than `max_lock_age`
    pub async fn release_stale(&self, max_lock_age: Duration) -> Result<u64, AppError> {
        let age = chrono::Duration::from_std(max_lock_age)
            .map_err(|e| AppError::validation(format!("Invalid lock age: {e}")))?;
        let released = self.store.release_stale(Utc::now() - age).await?;
        if released > 0 {
            tracing::warn!("Released {} stale job lock(s)", released);
        }
        Ok(released)
    }

    /// Get queue statistics
    pub async fn stats(&self) -> Result<QueueStats, AppError> {
        Ok(QueueStats {
            queued: self.store.count_by_status(JobStatus::Queued).await?,
            running: self.store.count_by_status(JobStatus::Running).await?,
            completed: self.store.count_by_status(JobStatus::Completed).await?,
            failed: self.store.count_by_status(JobStatus::Failed).await?,
        })
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of queued jobs
    pub queued: i64,
    /// Number of running jobs
    pub running: i64,
    /// Number of completed jobs
    pub completed: i64,
    /// Number of failed jobs
    pub failed: i64,
}
