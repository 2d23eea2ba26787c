//! Dataset processing status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an uploaded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dataset_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    /// Uploaded, waiting for its ingestion job.
    Pending,
    /// First ingestion in progress.
    Processing,
    /// Rows loaded; `row_count` is set.
    Completed,
    /// Ingestion gave up; `error_message` is set.
    Failed,
    /// Re-ingestion in progress.
    Reprocessing,
}

impl DatasetStatus {
    /// Whether an ingestion attempt is underway or scheduled.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Processing | Self::Reprocessing)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reprocessing => "reprocessing",
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
