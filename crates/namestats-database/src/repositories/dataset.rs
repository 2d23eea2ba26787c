//! Dataset repository implementation.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use namestats_core::error::{AppError, ErrorKind};
use namestats_core::result::AppResult;
use namestats_entity::dataset::{CreateDataset, Dataset, DatasetStatus};

use crate::store::DatasetStore;

/// Repository for uploaded dataset metadata.
#[derive(Debug, Clone)]
pub struct DatasetRepository {
    pool: PgPool,
}

impl DatasetRepository {
    /// Create a new dataset repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn expect_one(rows: u64, id: Uuid) -> AppResult<()> {
        if rows == 0 {
            return Err(AppError::not_found(format!("Dataset {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl DatasetStore for DatasetRepository {
    async fn create(&self, data: &CreateDataset) -> AppResult<Dataset> {
        sqlx::query_as::<_, Dataset>(
            "INSERT INTO datasets (country_code, filename, file_path, file_size, uploaded_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(&data.country_code)
        .bind(&data.filename)
        .bind(&data.file_path)
        .bind(data.file_size)
        .bind(data.uploaded_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create dataset", e))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Dataset>> {
        sqlx::query_as::<_, Dataset>(
            "SELECT * FROM datasets WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find dataset", e))
    }

    async fn list(&self, country_code: Option<&str>, limit: i64) -> AppResult<Vec<Dataset>> {
        sqlx::query_as::<_, Dataset>(
            "SELECT * FROM datasets WHERE deleted_at IS NULL \
             AND ($1::TEXT IS NULL OR country_code = $1) \
             ORDER BY uploaded_at DESC LIMIT $2",
        )
        .bind(country_code)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list datasets", e))
    }

    async fn mark_in_progress(&self, id: Uuid, status: DatasetStatus) -> AppResult<()> {
        if !status.is_in_progress() {
            return Err(AppError::validation(format!(
                "'{status}' is not an in-progress dataset status"
            )));
        }

        let result = sqlx::query(
            "UPDATE datasets SET status = $2, row_count = NULL, error_message = NULL \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update dataset status", e)
        })?;

        Self::expect_one(result.rows_affected(), id)
    }

    async fn mark_completed(&self, id: Uuid, row_count: i64) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE datasets SET status = 'completed', row_count = $2, error_message = NULL, \
             processed_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(row_count)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark dataset completed", e)
        })?;

        Self::expect_one(result.rows_affected(), id)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE datasets SET status = 'failed', row_count = NULL, error_message = $2, \
             processed_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to mark dataset failed", e)
        })?;

        Self::expect_one(result.rows_affected(), id)
    }

    async fn soft_delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE datasets SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to delete dataset", e))?;

        Ok(result.rows_affected() > 0)
    }
}
