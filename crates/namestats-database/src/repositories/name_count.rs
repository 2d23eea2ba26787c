//! Name-count repository with staged, per-batch atomic inserts.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use namestats_core::error::{AppError, ErrorKind};
use namestats_core::result::AppResult;
use namestats_entity::record::NameRecord;

use crate::store::NameCountStore;

/// Repository for the permanent `name_counts` table.
#[derive(Debug, Clone)]
pub struct NameCountRepository {
    pool: PgPool,
}

impl NameCountRepository {
    /// Create a new name-count repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NameCountStore for NameCountRepository {
    /// Load the batch into a transaction-scoped staging table, validate it
    /// there, and only then move it into `name_counts`.
    async fn insert_batch(
        &self,
        dataset_id: Uuid,
        country_code: &str,
        records: &[NameRecord],
    ) -> AppResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut years = Vec::with_capacity(records.len());
        let mut names = Vec::with_capacity(records.len());
        let mut genders = Vec::with_capacity(records.len());
        let mut counts = Vec::with_capacity(records.len());
        for record in records {
            years.push(record.year);
            names.push(record.name.as_str());
            genders.push(record.gender.as_str());
            counts.push(record.count);
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin batch transaction", e)
        })?;

        sqlx::query(
            "CREATE TEMP TABLE name_counts_staging ( \
                year INTEGER, name TEXT, gender TEXT, count INTEGER \
             ) ON COMMIT DROP",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create staging table", e))?;

        sqlx::query(
            "INSERT INTO name_counts_staging (year, name, gender, count) \
             SELECT * FROM UNNEST($1::INTEGER[], $2::TEXT[], $3::TEXT[], $4::INTEGER[])",
        )
        .bind(&years)
        .bind(&names)
        .bind(&genders)
        .bind(&counts)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to stage batch", e))?;

        let invalid: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM name_counts_staging \
             WHERE name IS NULL OR btrim(name) = '' \
             OR gender IS NULL OR gender NOT IN ('M', 'F') \
             OR count IS NULL OR count <= 0",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to validate staged batch", e))?;

        if invalid > 0 {
            tx.rollback().await.map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to roll back batch", e)
            })?;
            return Err(AppError::validation(format!(
                "Batch rejected: {invalid} of {} staged rows are invalid",
                records.len()
            )));
        }

        let moved = sqlx::query(
            "INSERT INTO name_counts (dataset_id, country_code, year, name, gender, count) \
             SELECT $1, $2, year, name, gender, count FROM name_counts_staging",
        )
        .bind(dataset_id)
        .bind(country_code)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to move staged rows", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit batch", e)
        })?;

        debug!(%dataset_id, rows = moved.rows_affected(), "Committed name-count batch");
        Ok(moved.rows_affected())
    }

    async fn delete_by_dataset(&self, dataset_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM name_counts WHERE dataset_id = $1")
            .bind(dataset_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete dataset rows", e)
            })?;
        Ok(result.rows_affected())
    }

    async fn count_by_dataset(&self, dataset_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM name_counts WHERE dataset_id = $1")
            .bind(dataset_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to count dataset rows", e)
            })
    }
}
