//! Job entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use namestats_core::error::AppError;

use super::payload::JobPayload;
use super::status::{JobStatus, JobType};

/// A durable background job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Kind of work.
    pub job_type: JobType,
    /// Dataset the job operates on.
    pub dataset_id: Option<Uuid>,
    /// Current job status.
    pub status: JobStatus,
    /// Tagged payload (JSON), see [`JobPayload`].
    pub payload: serde_json::Value,
    /// Result data on completion (JSON).
    pub result: Option<serde_json::Value>,
    /// Number of times the job has been locked for execution.
    pub attempts: i32,
    /// Maximum allowed attempts.
    pub max_attempts: i32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Earliest time the job may be locked again (None = now).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the current lock was taken.
    pub locked_at: Option<DateTime<Utc>>,
    /// Worker holding the current lock.
    pub locked_by: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was first locked.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Decode the typed payload.
    pub fn typed_payload(&self) -> Result<JobPayload, AppError> {
        JobPayload::from_value(&self.payload, self.job_type)
    }

    /// Whether another attempt may be scheduled after the current one.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the job may be locked at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Time between first lock and completion, when both are known.
    pub fn processing_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    /// Job type identifier.
    pub job_type: JobType,
    /// Dataset reference, if any.
    pub dataset_id: Option<Uuid>,
    /// Job-specific payload.
    pub payload: JobPayload,
    /// Maximum attempts.
    pub max_attempts: i32,
}

impl CreateJob {
    /// Build a job for a payload, deriving type and dataset from it.
    pub fn for_payload(payload: JobPayload, max_attempts: i32) -> Self {
        Self {
            job_type: payload.job_type(),
            dataset_id: Some(payload.dataset_id()),
            payload,
            max_attempts,
        }
    }

    /// Reject malformed creation requests before they reach the store.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_attempts < 1 {
            return Err(AppError::validation(format!(
                "max_attempts must be at least 1, got {}",
                self.max_attempts
            )));
        }
        if self.payload.job_type() != self.job_type {
            return Err(AppError::validation(format!(
                "Payload for '{}' cannot be used with job type '{}'",
                self.payload.job_type(),
                self.job_type
            )));
        }
        Ok(())
    }
}
