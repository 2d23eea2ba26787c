//! In-memory implementation of every store trait.
//!
//! One mutex guards jobs, datasets and rows together, which gives
//! `lock_next` the same single-winner guarantee the PostgreSQL repository
//! gets from `FOR UPDATE SKIP LOCKED`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use namestats_core::error::AppError;
use namestats_core::result::AppResult;
use namestats_entity::dataset::{CreateDataset, Dataset, DatasetStatus};
use namestats_entity::job::{CreateJob, Job, JobPayload, JobStatus};
use namestats_entity::record::NameRecord;

use crate::store::{DatasetStore, JobStore, NameCountStore, STALE_LOCK_ERROR, invalid_row_reason};

/// A persisted name-count row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Owning dataset.
    pub dataset_id: Uuid,
    /// Country the row was loaded for.
    pub country_code: String,
    /// The normalized record.
    pub record: NameRecord,
}

#[derive(Debug, Default)]
struct State {
    jobs: Vec<Job>,
    datasets: HashMap<Uuid, Dataset>,
    rows: Vec<StoredRow>,
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::internal("Memory store lock poisoned"))
    }

    /// Rows loaded for a dataset, in insertion order.
    pub fn rows_for(&self, dataset_id: Uuid) -> Vec<StoredRow> {
        self.state
            .lock()
            .map(|s| {
                s.rows
                    .iter()
                    .filter(|r| r.dataset_id == dataset_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A dataset regardless of its soft-delete marker.
    pub fn dataset_raw(&self, id: Uuid) -> Option<Dataset> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.datasets.get(&id).cloned())
    }
}

fn transition<'a>(
    state: &'a mut State,
    id: Uuid,
    worker_id: &str,
    target: JobStatus,
    op: &str,
) -> AppResult<Option<&'a mut Job>> {
    let job = state
        .jobs
        .iter_mut()
        .find(|j| j.id == id)
        .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

    match job.status {
        JobStatus::Running if job.locked_by.as_deref() == Some(worker_id) => Ok(Some(job)),
        JobStatus::Running => Err(AppError::conflict(format!(
            "Cannot {op} job {id}: locked by '{}', not '{worker_id}'",
            job.locked_by.as_deref().unwrap_or_default()
        ))),
        status if status == target => Ok(None),
        status => Err(AppError::conflict(format!(
            "Cannot {op} job {id} in status '{status}'"
        ))),
    }
}

fn has_active_job(state: &State, dataset_id: Uuid) -> bool {
    state
        .jobs
        .iter()
        .any(|j| j.dataset_id == Some(dataset_id) && !j.status.is_terminal())
}

fn new_job(data: &CreateJob) -> AppResult<Job> {
    data.validate()?;
    let now = Utc::now();
    Ok(Job {
        id: Uuid::new_v4(),
        job_type: data.job_type,
        dataset_id: data.dataset_id,
        status: JobStatus::Queued,
        payload: data.payload.to_value()?,
        result: None,
        attempts: 0,
        max_attempts: data.max_attempts,
        last_error: None,
        next_retry_at: None,
        locked_at: None,
        locked_by: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    })
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, data: &CreateJob) -> AppResult<Job> {
        let job = new_job(data)?;
        let mut state = self.state()?;
        if data.dataset_id.is_some_and(|id| has_active_job(&state, id)) {
            return Err(AppError::conflict(
                "Dataset already has a queued or running job",
            ));
        }
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.state()?.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_by_dataset(&self, dataset_id: Uuid) -> AppResult<Vec<Job>> {
        let state = self.state()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.dataset_id == Some(dataset_id))
            .cloned()
            .collect();
        jobs.reverse();
        Ok(jobs)
    }

    async fn lock_next(&self, worker_id: &str) -> AppResult<Option<Job>> {
        let now = Utc::now();
        let mut guard = self.state()?;
        let state = &mut *guard;

        let candidate = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_eligible(now) && j.attempts < j.max_attempts)
            .filter(|(_, j)| {
                j.dataset_id.is_none_or(|id| {
                    state.datasets.get(&id).is_none_or(|d| !d.is_deleted())
                })
            })
            .min_by_key(|(_, j)| j.created_at)
            .map(|(idx, _)| idx);

        let Some(idx) = candidate else {
            return Ok(None);
        };

        let job = &mut state.jobs[idx];
        job.status = JobStatus::Running;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.started_at = job.started_at.or(Some(now));
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        let mut state = self.state()?;
        if let Some(job) = transition(&mut state, id, worker_id, JobStatus::Completed, "complete")? {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.result = result.cloned();
            job.completed_at = Some(now);
            job.locked_at = None;
            job.locked_by = None;
            job.next_retry_at = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> AppResult<()> {
        let mut state = self.state()?;
        if let Some(job) = transition(&mut state, id, worker_id, JobStatus::Failed, "fail")? {
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.completed_at = Some(now);
            job.locked_at = None;
            job.locked_by = None;
            job.next_retry_at = None;
            job.updated_at = now;
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
        let mut state = self.state()?;
        if let Some(job) = transition(&mut state, id, worker_id, JobStatus::Queued, "retry")? {
            job.status = JobStatus::Queued;
            job.last_error = Some(error.to_string());
            job.next_retry_at = Some(next_retry_at);
            job.locked_at = None;
            job.locked_by = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_stale(&self, locked_before: DateTime<Utc>) -> AppResult<u64> {
        let now = Utc::now();
        let mut guard = self.state()?;
        let state = &mut *guard;
        let mut touched = 0;
        let mut expired_datasets = Vec::new();
        for job in state.jobs.iter_mut() {
            let stale = job.status == JobStatus::Running
                && job.locked_at.is_some_and(|at| at < locked_before);
            if !stale {
                continue;
            }
            job.status = if job.attempts >= job.max_attempts {
                job.completed_at = Some(now);
                expired_datasets.extend(job.dataset_id);
                JobStatus::Failed
            } else {
                JobStatus::Queued
            };
            job.last_error = Some(STALE_LOCK_ERROR.to_string());
            job.locked_at = None;
            job.locked_by = None;
            job.updated_at = now;
            touched += 1;
        }

        for id in expired_datasets {
            if let Some(dataset) = state.datasets.get_mut(&id).filter(|d| !d.is_deleted()) {
                dataset.status = DatasetStatus::Failed;
                dataset.row_count = None;
                dataset.error_message = Some(STALE_LOCK_ERROR.to_string());
                dataset.processed_at = Some(now);
            }
        }
        Ok(touched)
    }

    async fn enqueue_reprocess(&self, dataset_id: Uuid, max_attempts: i32) -> AppResult<Job> {
        let job = new_job(&CreateJob::for_payload(
            JobPayload::ReprocessDataset { dataset_id },
            max_attempts,
        ))?;
        let mut state = self.state()?;
        live_dataset(&mut state, dataset_id)?;
        if has_active_job(&state, dataset_id) {
            return Err(AppError::conflict(format!(
                "Dataset {dataset_id} already has a queued or running job"
            )));
        }
        let dataset = live_dataset(&mut state, dataset_id)?;
        dataset.status = DatasetStatus::Reprocessing;
        dataset.row_count = None;
        dataset.error_message = None;
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<i64> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .count() as i64)
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn create(&self, data: &CreateDataset) -> AppResult<Dataset> {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            country_code: data.country_code.clone(),
            filename: data.filename.clone(),
            file_path: data.file_path.clone(),
            file_size: data.file_size,
            status: DatasetStatus::Pending,
            row_count: None,
            error_message: None,
            uploaded_by: data.uploaded_by,
            uploaded_at: Utc::now(),
            processed_at: None,
            deleted_at: None,
        };
        self.state()?.datasets.insert(dataset.id, dataset.clone());
        Ok(dataset)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Dataset>> {
        Ok(self
            .state()?
            .datasets
            .get(&id)
            .filter(|d| !d.is_deleted())
            .cloned())
    }

    async fn list(&self, country_code: Option<&str>, limit: i64) -> AppResult<Vec<Dataset>> {
        let state = self.state()?;
        let mut datasets: Vec<Dataset> = state
            .datasets
            .values()
            .filter(|d| !d.is_deleted())
            .filter(|d| country_code.is_none_or(|c| d.country_code == c))
            .cloned()
            .collect();
        datasets.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        datasets.truncate(limit.max(0) as usize);
        Ok(datasets)
    }

    async fn mark_in_progress(&self, id: Uuid, status: DatasetStatus) -> AppResult<()> {
        if !status.is_in_progress() {
            return Err(AppError::validation(format!(
                "'{status}' is not an in-progress dataset status"
            )));
        }
        let mut state = self.state()?;
        let dataset = live_dataset(&mut state, id)?;
        dataset.status = status;
        dataset.row_count = None;
        dataset.error_message = None;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, row_count: i64) -> AppResult<()> {
        let mut state = self.state()?;
        let dataset = live_dataset(&mut state, id)?;
        dataset.status = DatasetStatus::Completed;
        dataset.row_count = Some(row_count);
        dataset.error_message = None;
        dataset.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> AppResult<()> {
        let mut state = self.state()?;
        let dataset = live_dataset(&mut state, id)?;
        dataset.status = DatasetStatus::Failed;
        dataset.row_count = None;
        dataset.error_message = Some(error.to_string());
        dataset.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state()?;
        match state.datasets.get_mut(&id) {
            Some(d) if !d.is_deleted() => {
                d.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn live_dataset(state: &mut State, id: Uuid) -> AppResult<&mut Dataset> {
    state
        .datasets
        .get_mut(&id)
        .filter(|d| !d.is_deleted())
        .ok_or_else(|| AppError::not_found(format!("Dataset {id} not found")))
}

#[async_trait]
impl NameCountStore for MemoryStore {
    async fn insert_batch(
        &self,
        dataset_id: Uuid,
        country_code: &str,
        records: &[NameRecord],
    ) -> AppResult<u64> {
        let invalid = records
            .iter()
            .filter(|r| invalid_row_reason(r).is_some())
            .count();
        if invalid > 0 {
            return Err(AppError::validation(format!(
                "Batch rejected: {invalid} of {} staged rows are invalid",
                records.len()
            )));
        }

        let mut state = self.state()?;
        state.rows.extend(records.iter().map(|record| StoredRow {
            dataset_id,
            country_code: country_code.to_string(),
            record: record.clone(),
        }));
        Ok(records.len() as u64)
    }

    async fn delete_by_dataset(&self, dataset_id: Uuid) -> AppResult<u64> {
        let mut state = self.state()?;
        let before = state.rows.len();
        state.rows.retain(|r| r.dataset_id != dataset_id);
        Ok((before - state.rows.len()) as u64)
    }

    async fn count_by_dataset(&self, dataset_id: Uuid) -> AppResult<i64> {
        Ok(self
            .state()?
            .rows
            .iter()
            .filter(|r| r.dataset_id == dataset_id)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use namestats_core::error::ErrorKind;

    use super::*;

    async fn seed_dataset(store: &MemoryStore) -> Dataset {
        DatasetStore::create(
            store,
            &CreateDataset {
                country_code: "US".to_string(),
                filename: "yob2023.txt".to_string(),
                file_path: "US/yob2023.txt".to_string(),
                file_size: 42,
                uploaded_by: None,
            },
        )
        .await
        .unwrap()
    }

    async fn seed_job(store: &MemoryStore, max_attempts: i32) -> Job {
        let dataset = seed_dataset(store).await;
        JobStore::create(
            store,
            &CreateJob::for_payload(
                JobPayload::ParseDataset {
                    dataset_id: dataset.id,
                },
                max_attempts,
            ),
        )
        .await
        .unwrap()
    }

    async fn race_lock_next(store: &Arc<MemoryStore>, workers: usize) -> Vec<Uuid> {
        let handles: Vec<_> = (0..workers)
            .map(|n| {
                let store = Arc::clone(store);
                tokio::spawn(async move { store.lock_next(&format!("w-{n}")).await.unwrap() })
            })
            .collect();

        let mut locked = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                locked.push(job.id);
            }
        }
        locked
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_next_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..5 {
            seed_job(&store, 3).await;
        }

        let mut locked = race_lock_next(&store, 8).await;
        locked.sort();
        let before = locked.len();
        locked.dedup();
        assert_eq!(before, 5);
        assert_eq!(locked.len(), 5);
        assert_eq!(store.count_by_status(JobStatus::Running).await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fewer_workers_than_jobs_leaves_rest_queued() {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(seed_job(&store, 3).await.id);
        }

        let mut locked = race_lock_next(&store, 4).await;
        locked.sort();
        locked.dedup();
        assert_eq!(locked.len(), 4);

        let mut leftover = 0;
        for id in ids.iter().filter(|id| !locked.contains(id)) {
            let job = JobStore::find_by_id(store.as_ref(), *id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Queued);
            assert_eq!(job.attempts, 0);
            assert!(job.locked_by.is_none());
            leftover += 1;
        }
        assert_eq!(leftover, 2);
    }

    #[tokio::test]
    async fn test_lock_next_is_fifo_and_skips_deleted_datasets() {
        let store = MemoryStore::new();
        let first = seed_job(&store, 3).await;
        let second = seed_job(&store, 3).await;

        store.soft_delete(first.dataset_id.unwrap()).await.unwrap();

        let locked = store.lock_next("w-1").await.unwrap().unwrap();
        assert_eq!(locked.id, second.id);
        assert_eq!(locked.attempts, 1);
        assert_eq!(locked.locked_by.as_deref(), Some("w-1"));
        assert!(store.lock_next("w-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_idempotent() {
        let store = MemoryStore::new();
        let job = seed_job(&store, 3).await;
        store.lock_next("w-1").await.unwrap().unwrap();

        let result = serde_json::json!({ "rows_processed": 3 });
        store.complete(job.id, "w-1", Some(&result)).await.unwrap();
        store.complete(job.id, "w-1", Some(&result)).await.unwrap();
        assert!(store.fail(job.id, "w-1", "late").await.is_err());

        let stored = JobStore::find_by_id(&store, job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.locked_by.is_none());
        assert!(stored.processing_duration().is_some());
    }

    #[tokio::test]
    async fn test_superseded_lock_holder_cannot_settle() {
        let store = MemoryStore::new();
        let job = seed_job(&store, 3).await;
        store.lock_next("w-old").await.unwrap().unwrap();
        store
            .release_stale(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        store.lock_next("w-new").await.unwrap().unwrap();

        for err in [
            store.complete(job.id, "w-old", None).await.unwrap_err(),
            store.fail(job.id, "w-old", "late").await.unwrap_err(),
            store.retry(job.id, "w-old", "late", Utc::now()).await.unwrap_err(),
        ] {
            assert_eq!(err.kind, ErrorKind::Conflict);
        }

        let stored = JobStore::find_by_id(&store, job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.locked_by.as_deref(), Some("w-new"));

        store.complete(job.id, "w-new", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_stale_requeues_or_fails() {
        let store = MemoryStore::new();
        let retryable = seed_job(&store, 3).await;
        let exhausted = seed_job(&store, 1).await;
        store.lock_next("w-1").await.unwrap().unwrap();
        store.lock_next("w-2").await.unwrap().unwrap();
        for job in [&retryable, &exhausted] {
            store
                .mark_in_progress(job.dataset_id.unwrap(), DatasetStatus::Processing)
                .await
                .unwrap();
        }

        let released = store
            .release_stale(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(released, 2);

        let retryable = JobStore::find_by_id(&store, retryable.id).await.unwrap().unwrap();
        assert_eq!(retryable.status, JobStatus::Queued);
        let dataset = store.dataset_raw(retryable.dataset_id.unwrap()).unwrap();
        assert_eq!(dataset.status, DatasetStatus::Processing);

        let exhausted = JobStore::find_by_id(&store, exhausted.id).await.unwrap().unwrap();
        assert_eq!(exhausted.status, JobStatus::Failed);
        let dataset = store.dataset_raw(exhausted.dataset_id.unwrap()).unwrap();
        assert_eq!(dataset.status, DatasetStatus::Failed);
        assert_eq!(dataset.error_message.as_deref(), Some(STALE_LOCK_ERROR));
        assert!(dataset.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_one_active_job_per_dataset() {
        let store = MemoryStore::new();
        let job = seed_job(&store, 3).await;
        let dataset_id = job.dataset_id.unwrap();

        let dup = JobStore::create(
            &store,
            &CreateJob::for_payload(JobPayload::ParseDataset { dataset_id }, 3),
        )
        .await
        .unwrap_err();
        assert_eq!(dup.kind, ErrorKind::Conflict);
        assert_eq!(
            store.enqueue_reprocess(dataset_id, 3).await.unwrap_err().kind,
            ErrorKind::Conflict
        );

        store.lock_next("w-1").await.unwrap().unwrap();
        store.complete(job.id, "w-1", None).await.unwrap();

        let reprocess = store.enqueue_reprocess(dataset_id, 3).await.unwrap();
        assert_eq!(reprocess.status, JobStatus::Queued);
        assert_eq!(
            store.dataset_raw(dataset_id).unwrap().status,
            DatasetStatus::Reprocessing
        );
        assert_eq!(
            store.enqueue_reprocess(Uuid::new_v4(), 3).await.unwrap_err().kind,
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_invalid_row_rejects_whole_batch() {
        let store = MemoryStore::new();
        let dataset_id = Uuid::new_v4();
        let mut batch: Vec<NameRecord> = (0..999)
            .map(|i| NameRecord::new(2023, format!("Name{i}"), "F", 10))
            .collect();
        batch.push(NameRecord::new(2023, "", "M", 5));

        assert!(store.insert_batch(dataset_id, "US", &batch).await.is_err());
        assert_eq!(store.count_by_dataset(dataset_id).await.unwrap(), 0);
    }
}
