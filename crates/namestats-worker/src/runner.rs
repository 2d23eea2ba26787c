//! Worker pool: a fixed set of tasks that lock jobs and process them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing;

use namestats_core::config::WorkerConfig;

use crate::processor::{DatasetProcessor, ProcessOutcome};

/// Runs `concurrency` workers against one shared processor.
#[derive(Debug)]
pub struct WorkerPool {
    /// Shared job processor
    processor: Arc<DatasetProcessor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Shutdown signal shared by all workers
    cancel: CancellationToken,
    /// Spawned worker tasks
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool; no worker runs until [`WorkerPool::start`].
    pub fn new(processor: Arc<DatasetProcessor>, config: WorkerConfig) -> Self {
        Self {
            processor,
            config,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token observed by every worker and in-flight job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Identifiers the workers lock jobs under.
    pub fn worker_ids(&self) -> Vec<String> {
        let pid = std::process::id();
        (0..self.config.concurrency)
            .map(|n| format!("{}-{}-{}", self.config.worker_id_prefix, pid, n))
            .collect()
    }

    /// Spawn all workers. Calling it on a running pool does nothing.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(
            "Worker pool starting with concurrency={}, poll_interval={}ms",
            self.config.concurrency,
            self.config.poll_interval_ms
        );

        for worker_id in self.worker_ids() {
            let processor = Arc::clone(&self.processor);
            let cancel = self.cancel.clone();
            self.handles.push(tokio::spawn(run_worker(
                worker_id,
                processor,
                poll_interval,
                cancel,
            )));
        }
    }

    /// Signal shutdown and wait for every worker to finish its current job.
    pub async fn shutdown(mut self) {
        tracing::info!("Worker pool shutting down, waiting for in-flight jobs...");
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool shut down complete");
    }
}

async fn run_worker(
    worker_id: String,
    processor: Arc<DatasetProcessor>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Worker '{}' started", worker_id);

    while !cancel.is_cancelled() {
        let idle = match processor.queue().dequeue(&worker_id).await {
            Ok(Some(job)) => {
                tracing::info!(
                    "Processing job: id={}, type='{}', attempt={}/{}",
                    job.id,
                    job.job_type,
                    job.attempts,
                    job.max_attempts
                );
                match processor.process(&job, &cancel).await {
                    Ok(ProcessOutcome::Completed { rows }) => {
                        tracing::info!("Job {} completed: {} rows", job.id, rows);
                    }
                    Ok(ProcessOutcome::Retrying { .. }) | Ok(ProcessOutcome::Failed { .. }) => {}
                    Err(e) => {
                        tracing::error!("Failed to record outcome of job {}: {}", job.id, e);
                    }
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::error!("Worker '{}' failed to lock a job: {}", worker_id, e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(poll_interval) => {}
            }
        }
    }

    tracing::info!("Worker '{}' stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use tokio::sync::Notify;

    use namestats_core::config::{IngestConfig, RetryStrategy};
    use namestats_core::result::AppResult;
    use namestats_core::traits::storage::{ByteStream, StorageProvider};
    use namestats_database::{DatasetStore, JobStore, MemoryStore, NameCountStore};
    use namestats_entity::dataset::CreateDataset;
    use namestats_entity::job::{JobPayload, JobStatus};
    use namestats_ingest::ParserRegistry;
    use namestats_storage::MemoryStorageProvider;

    use super::*;
    use crate::processor::ProcessorDeps;
    use crate::queue::JobQueue;
    use crate::retry::RetryPolicy;

    /// Serves one line of every file, then never yields again.
    #[derive(Debug, Default)]
    struct StallingStorage {
        opened: Notify,
    }

    #[async_trait]
    impl StorageProvider for StallingStorage {
        fn provider_type(&self) -> &str {
            "stalling"
        }

        async fn save(&self, scope_id: &str, filename: &str, _data: Bytes) -> AppResult<String> {
            Ok(format!("{scope_id}/{filename}"))
        }

        async fn load(&self, _path: &str) -> AppResult<ByteStream> {
            self.opened.notify_one();
            let first = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"Ava,F,3\n"))]);
            Ok(Box::pin(first.chain(stream::pending())))
        }

        async fn delete(&self, _path: &str) -> AppResult<()> {
            Ok(())
        }

        async fn exists(&self, _path: &str) -> AppResult<bool> {
            Ok(true)
        }
    }

    fn processor(store: &Arc<MemoryStore>, storage: Arc<dyn StorageProvider>) -> DatasetProcessor {
        let config = IngestConfig::default();
        DatasetProcessor::new(
            ProcessorDeps {
                queue: JobQueue::new(store.clone(), 3),
                datasets: store.clone(),
                counts: store.clone(),
                storage,
                registry: Arc::new(ParserRegistry::with_builtin(&config).unwrap()),
            },
            config.normalizer,
            1000,
            RetryPolicy::new(RetryStrategy::Fixed, Duration::ZERO, Duration::ZERO),
        )
    }

    fn config(concurrency: usize) -> WorkerConfig {
        WorkerConfig {
            concurrency,
            poll_interval_ms: 10,
            worker_id_prefix: "pool-test".to_string(),
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageProvider::new());
        let processor = Arc::new(processor(&store, storage.clone()));

        for year in 2001..2006 {
            let filename = format!("yob{year}.txt");
            let path = storage
                .save("US", &filename, Bytes::from_static(b"Ava,F,3\nLeo,M,4\n"))
                .await
                .unwrap();
            let dataset = DatasetStore::create(
                store.as_ref(),
                &CreateDataset {
                    country_code: "US".to_string(),
                    filename,
                    file_path: path,
                    file_size: 16,
                    uploaded_by: None,
                },
            )
            .await
            .unwrap();
            processor
                .queue()
                .enqueue(JobPayload::ParseDataset {
                    dataset_id: dataset.id,
                })
                .await
                .unwrap();
        }

        let mut pool = WorkerPool::new(Arc::clone(&processor), config(3));
        assert_eq!(pool.worker_ids().len(), 3);
        pool.start();

        time::timeout(Duration::from_secs(10), async {
            while store.count_by_status(JobStatus::Completed).await.unwrap() < 5 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue drained");

        pool.shutdown().await;
        assert_eq!(store.count_by_status(JobStatus::Running).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_idle_pool() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageProvider::new());
        let mut pool = WorkerPool::new(Arc::new(processor(&store, storage)), config(2));
        pool.start();
        pool.start();

        let token = pool.cancellation_token();
        time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("idle workers stop promptly");
        assert!(token.is_cancelled());
        assert_eq!(JobStore::count_by_status(store.as_ref(), JobStatus::Queued).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_requeues_in_flight_job() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StallingStorage::default());
        let processor = Arc::new(processor(&store, storage.clone()));

        let dataset = DatasetStore::create(
            store.as_ref(),
            &CreateDataset {
                country_code: "US".to_string(),
                filename: "yob2010.txt".to_string(),
                file_path: "US/yob2010.txt".to_string(),
                file_size: 1 << 20,
                uploaded_by: None,
            },
        )
        .await
        .unwrap();
        let job = processor
            .queue()
            .enqueue(JobPayload::ParseDataset {
                dataset_id: dataset.id,
            })
            .await
            .unwrap();

        let mut pool = WorkerPool::new(processor, config(1));
        pool.start();
        time::timeout(Duration::from_secs(5), storage.opened.notified())
            .await
            .expect("job picked up");

        time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("in-flight job observes cancellation");

        let job = JobStore::find_by_id(store.as_ref(), job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("Processing cancelled"));
        assert!(job.locked_by.is_none());
        assert_eq!(JobStore::count_by_status(store.as_ref(), JobStatus::Running).await.unwrap(), 0);
        assert_eq!(store.count_by_dataset(dataset.id).await.unwrap(), 0);
    }
}
