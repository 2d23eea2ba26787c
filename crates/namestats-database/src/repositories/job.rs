//! Job repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use namestats_core::error::{AppError, ErrorKind};
use namestats_core::result::AppResult;
use namestats_entity::job::{CreateJob, Job, JobPayload, JobStatus};

use crate::store::{JobStore, STALE_LOCK_ERROR};

/// Repository for ingestion jobs and their queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a zero-row transition: success if the job already sits in
    /// `target`, otherwise not-found or conflict.
    async fn settle_transition(
        &self,
        id: Uuid,
        worker_id: &str,
        target: JobStatus,
        op: &str,
    ) -> AppResult<()> {
        let current: Option<(JobStatus, Option<String>)> =
            sqlx::query_as("SELECT status, locked_by FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to read job status", e)
                })?;

        match current {
            None => Err(AppError::not_found(format!("Job {id} not found"))),
            Some((status, _)) if status == target => Ok(()),
            Some((JobStatus::Running, holder)) => Err(AppError::conflict(format!(
                "Cannot {op} job {id}: locked by '{}', not '{worker_id}'",
                holder.unwrap_or_default()
            ))),
            Some((status, _)) => Err(AppError::conflict(format!(
                "Cannot {op} job {id} in status '{status}'"
            ))),
        }
    }
}

async fn insert_job<'e>(executor: impl PgExecutor<'e>, data: &CreateJob) -> AppResult<Job> {
    data.validate()?;
    let payload = data.payload.to_value()?;

    sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (job_type, dataset_id, payload, max_attempts) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(data.job_type)
    .bind(data.dataset_id)
    .bind(&payload)
    .bind(data.max_attempts)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        let unique = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique {
            AppError::with_source(
                ErrorKind::Conflict,
                "Dataset already has a queued or running job",
                e,
            )
        } else {
            AppError::with_source(ErrorKind::Database, "Failed to create job", e)
        }
    })
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, data: &CreateJob) -> AppResult<Job> {
        insert_job(&self.pool, data).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn find_by_dataset(&self, dataset_id: Uuid) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE dataset_id = $1 ORDER BY created_at DESC",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list dataset jobs", e))
    }

    /// Lock the next eligible job (SKIP LOCKED for concurrency).
    async fn lock_next(&self, worker_id: &str) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = 'running', locked_at = NOW(), locked_by = $1, \
             started_at = COALESCE(started_at, NOW()), attempts = attempts + 1, \
             updated_at = NOW() \
             WHERE status = 'queued' AND id = ( \
                SELECT j.id FROM jobs j \
                LEFT JOIN datasets d ON d.id = j.dataset_id \
                WHERE j.status = 'queued' \
                AND (j.next_retry_at IS NULL OR j.next_retry_at <= NOW()) \
                AND j.attempts < j.max_attempts \
                AND (j.dataset_id IS NULL OR d.deleted_at IS NULL) \
                ORDER BY j.created_at ASC \
                FOR UPDATE OF j SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock next job", e))
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'completed', result = $3, completed_at = NOW(), \
             locked_at = NULL, locked_by = NULL, next_retry_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'running' AND locked_by = $2",
        )
        .bind(id)
        .bind(worker_id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete job", e))?;

        if updated.rows_affected() == 0 {
            return self
                .settle_transition(id, worker_id, JobStatus::Completed, "complete")
                .await;
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> AppResult<()> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $3, completed_at = NOW(), \
             locked_at = NULL, locked_by = NULL, next_retry_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'running' AND locked_by = $2",
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark job as failed", e)
        })?;

        if updated.rows_affected() == 0 {
            return self
                .settle_transition(id, worker_id, JobStatus::Failed, "fail")
                .await;
        }
        Ok(())
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'queued', last_error = $3, next_retry_at = $4, \
             locked_at = NULL, locked_by = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'running' AND locked_by = $2",
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to schedule retry", e))?;

        if updated.rows_affected() == 0 {
            return self
                .settle_transition(id, worker_id, JobStatus::Queued, "retry")
                .await;
        }
        Ok(())
    }

    async fn release_stale(&self, locked_before: DateTime<Utc>) -> AppResult<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let expired: Vec<Option<Uuid>> = sqlx::query_scalar(
            "UPDATE jobs SET status = 'failed', last_error = $2, completed_at = NOW(), \
             locked_at = NULL, locked_by = NULL, updated_at = NOW() \
             WHERE status = 'running' AND locked_at < $1 AND attempts >= max_attempts \
             RETURNING dataset_id",
        )
        .bind(locked_before)
        .bind(STALE_LOCK_ERROR)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to expire stale jobs", e))?;

        let dataset_ids: Vec<Uuid> = expired.iter().flatten().copied().collect();
        if !dataset_ids.is_empty() {
            sqlx::query(
                "UPDATE datasets SET status = 'failed', row_count = NULL, error_message = $2, \
                 processed_at = NOW() WHERE id = ANY($1) AND deleted_at IS NULL",
            )
            .bind(&dataset_ids)
            .bind(STALE_LOCK_ERROR)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to fail stale datasets", e)
            })?;
        }

        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'queued', last_error = $2, \
             locked_at = NULL, locked_by = NULL, updated_at = NOW() \
             WHERE status = 'running' AND locked_at < $1",
        )
        .bind(locked_before)
        .bind(STALE_LOCK_ERROR)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to requeue stale jobs", e)
        })?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit stale job release", e)
        })?;

        Ok(expired.len() as u64 + requeued.rows_affected())
    }

    async fn enqueue_reprocess(&self, dataset_id: Uuid, max_attempts: i32) -> AppResult<Job> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        // The row lock serializes concurrent requests for one dataset.
        let live: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM datasets WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(dataset_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock dataset", e))?;
        if live.is_none() {
            return Err(AppError::not_found(format!("Dataset {dataset_id} not found")));
        }

        let active: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM jobs WHERE dataset_id = $1 \
             AND status IN ('queued', 'running'))",
        )
        .bind(dataset_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to check active jobs", e))?;
        if active {
            return Err(AppError::conflict(format!(
                "Dataset {dataset_id} already has a queued or running job"
            )));
        }

        sqlx::query(
            "UPDATE datasets SET status = 'reprocessing', row_count = NULL, error_message = NULL \
             WHERE id = $1",
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark dataset reprocessing", e)
        })?;

        let job = insert_job(
            &mut *tx,
            &CreateJob::for_payload(JobPayload::ReprocessDataset { dataset_id }, max_attempts),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit reprocess request", e)
        })?;
        Ok(job)
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))
    }
}
