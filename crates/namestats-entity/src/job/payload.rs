//! Typed job payload definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use namestats_core::error::AppError;

use super::status::JobType;

/// Typed payloads for known job types.
///
/// Stored in the `payload` JSONB column, tagged with the same label as the
/// job's `job_type` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum JobPayload {
    /// Ingest a freshly uploaded dataset.
    #[serde(rename = "parse_dataset")]
    ParseDataset {
        /// Dataset to ingest.
        dataset_id: Uuid,
    },
    /// Delete a dataset's rows and ingest it again.
    #[serde(rename = "reprocess_dataset")]
    ReprocessDataset {
        /// Dataset to reprocess.
        dataset_id: Uuid,
    },
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::ParseDataset { .. } => JobType::ParseDataset,
            Self::ReprocessDataset { .. } => JobType::ReprocessDataset,
        }
    }

    /// The dataset referenced by the payload.
    pub fn dataset_id(&self) -> Uuid {
        match self {
            Self::ParseDataset { dataset_id } | Self::ReprocessDataset { dataset_id } => {
                *dataset_id
            }
        }
    }

    /// Serialize into the JSON stored on the job row.
    pub fn to_value(&self) -> Result<serde_json::Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a stored payload, requiring its tag to match `expected`.
    pub fn from_value(value: &serde_json::Value, expected: JobType) -> Result<Self, AppError> {
        let payload: Self = serde_json::from_value(value.clone()).map_err(|e| {
            AppError::validation(format!("Malformed {expected} payload: {e}"))
        })?;
        if payload.job_type() != expected {
            return Err(AppError::validation(format!(
                "Payload tagged '{}' does not match job type '{}'",
                payload.job_type(),
                expected
            )));
        }
        Ok(payload)
    }
}
