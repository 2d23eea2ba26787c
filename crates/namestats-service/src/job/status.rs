//! Read-only job status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use namestats_core::error::AppError;
use namestats_database::JobStore;
use namestats_entity::job::{Job, JobStatus, JobType};

/// What callers may see of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job ID.
    pub id: Uuid,
    /// Job type.
    pub job_type: JobType,
    /// Dataset the job works on.
    pub dataset_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Attempts made so far.
    pub attempts: i32,
    /// Attempts allowed.
    pub max_attempts: i32,
    /// Most recent error.
    pub last_error: Option<String>,
    /// Earliest time of the next attempt.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Result of a completed job.
    pub result: Option<serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First lock time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds from first lock to terminal state.
    pub processing_duration_ms: Option<i64>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            dataset_id: job.dataset_id,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            next_retry_at: job.next_retry_at,
            result: job.result.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            processing_duration_ms: job.processing_duration().map(|d| d.num_milliseconds()),
        }
    }
}

/// Looks up job status views.
#[derive(Debug, Clone)]
pub struct JobStatusService {
    jobs: Arc<dyn JobStore>,
}

impl JobStatusService {
    /// Creates a new job status service.
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Status of one job.
    pub async fn get(&self, job_id: Uuid) -> Result<JobStatusView, AppError> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .map(|job| JobStatusView::from(&job))
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    /// Every job of a dataset, newest first.
    pub async fn for_dataset(&self, dataset_id: Uuid) -> Result<Vec<JobStatusView>, AppError> {
        Ok(self
            .jobs
            .find_by_dataset(dataset_id)
            .await?
            .iter()
            .map(JobStatusView::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use namestats_database::MemoryStore;
    use namestats_entity::job::{CreateJob, JobPayload};

    use super::*;

    #[tokio::test]
    async fn test_view_reports_duration_once_finished() {
        let store = Arc::new(MemoryStore::new());
        let service = JobStatusService::new(store.clone());
        let dataset_id = Uuid::new_v4();
        let job = store
            .create(&CreateJob::for_payload(JobPayload::ParseDataset { dataset_id }, 3))
            .await
            .unwrap();

        let view = service.get(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.processing_duration_ms, None);

        store.lock_next("w").await.unwrap().unwrap();
        assert_eq!(service.get(job.id).await.unwrap().processing_duration_ms, None);

        store.complete(job.id, "w", None).await.unwrap();
        let view = service.get(job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert!(view.processing_duration_ms.is_some_and(|ms| ms >= 0));

        assert_eq!(service.for_dataset(dataset_id).await.unwrap().len(), 1);
        assert!(service.get(Uuid::new_v4()).await.is_err());
    }
}
