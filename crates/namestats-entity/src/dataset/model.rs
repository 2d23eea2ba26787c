//! Dataset entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::DatasetStatus;

/// One uploaded source file and its ingestion state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dataset {
    /// Unique dataset identifier.
    pub id: Uuid,
    /// Source identifier used to pick a parser (e.g. `"US"`).
    pub country_code: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Path within the storage provider.
    pub file_path: String,
    /// Size of the uploaded file in bytes.
    pub file_size: i64,
    /// Processing status.
    pub status: DatasetStatus,
    /// Rows loaded by the last successful ingestion.
    pub row_count: Option<i64>,
    /// Error from the last failed ingestion.
    pub error_message: Option<String>,
    /// Uploader identity.
    pub uploaded_by: Option<Uuid>,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
    /// Time of the last terminal ingestion outcome.
    pub processed_at: Option<DateTime<Utc>>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Dataset {
    /// Whether the dataset has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Data required to register an uploaded dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataset {
    /// Source identifier.
    pub country_code: String,
    /// Original filename.
    pub filename: String,
    /// Storage path returned by the provider.
    pub file_path: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Uploader identity.
    pub uploaded_by: Option<Uuid>,
}
