//! Drains a parse stream into the name-count store in fixed-size batches.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use namestats_database::NameCountStore;
use namestats_entity::dataset::Dataset;
use namestats_entity::record::NameRecord;

use crate::error::IngestError;
use crate::parser::ParseStream;

/// Consumer side of a parse: batches records and commits each batch
/// atomically.
///
/// An error stops the run immediately. Batches committed before it stay.
#[derive(Debug, Clone)]
pub struct BatchInserter {
    store: Arc<dyn NameCountStore>,
    batch_size: usize,
}

impl BatchInserter {
    /// Create an inserter committing `batch_size` rows per transaction.
    pub fn new(store: Arc<dyn NameCountStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Consume the stream and return the number of rows inserted.
    pub async fn run(
        &self,
        dataset: &Dataset,
        mut stream: ParseStream,
        cancel: &CancellationToken,
    ) -> Result<u64, IngestError> {
        let mut batch: Vec<NameRecord> = Vec::with_capacity(self.batch_size);
        let mut total = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                Some(err) = stream.errors.recv() => return Err(err),
                next = stream.records.recv() => match next {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= self.batch_size {
                            total += self.flush(dataset, &mut batch).await?;
                        }
                    }
                    None => {
                        // The producer queues its error before closing records.
                        if let Ok(err) = stream.errors.try_recv() {
                            return Err(err);
                        }
                        total += self.flush(dataset, &mut batch).await?;
                        return Ok(total);
                    }
                },
            }
        }
    }

    async fn flush(&self, dataset: &Dataset, batch: &mut Vec<NameRecord>) -> Result<u64, IngestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .store
            .insert_batch(dataset.id, &dataset.country_code, batch)
            .await
            .map_err(IngestError::Database)?;
        debug!(dataset_id = %dataset.id, rows = inserted, "Flushed batch");
        batch.clear();
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use namestats_database::MemoryStore;
    use namestats_entity::dataset::DatasetStatus;

    use super::*;

    fn dataset() -> Dataset {
        Dataset {
            id: Uuid::new_v4(),
            country_code: "US".to_string(),
            filename: "yob2023.txt".to_string(),
            file_path: "US/yob2023.txt".to_string(),
            file_size: 100,
            status: DatasetStatus::Processing,
            row_count: None,
            error_message: None,
            uploaded_by: None,
            uploaded_at: Utc::now(),
            processed_at: None,
            deleted_at: None,
        }
    }

    fn channels() -> (
        mpsc::Sender<NameRecord>,
        mpsc::Sender<IngestError>,
        ParseStream,
    ) {
        let (record_tx, records) = mpsc::channel(100);
        let (error_tx, errors) = mpsc::channel(1);
        (record_tx, error_tx, ParseStream { records, errors })
    }

    fn record(i: usize) -> NameRecord {
        NameRecord::new(2023, format!("Name{i}"), "F", 1)
    }

    #[tokio::test]
    async fn test_flushes_full_and_partial_batches() {
        let store = Arc::new(MemoryStore::new());
        let inserter = BatchInserter::new(store.clone(), 2);
        let dataset = dataset();
        let (record_tx, error_tx, stream) = channels();

        for i in 0..5 {
            record_tx.send(record(i)).await.unwrap();
        }
        drop(record_tx);
        drop(error_tx);

        let total = inserter
            .run(&dataset, stream, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(store.count_by_dataset(dataset.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_error_keeps_committed_batches_and_drops_partial() {
        let store = Arc::new(MemoryStore::new());
        let inserter = BatchInserter::new(store.clone(), 2);
        let dataset = dataset();
        let (record_tx, error_tx, stream) = channels();

        let producer = tokio::spawn(async move {
            for i in 0..3 {
                record_tx.send(record(i)).await.unwrap();
            }
            error_tx
                .send(IngestError::InvalidRecord {
                    line: 4,
                    reason: "count 'x' is not an integer".into(),
                })
                .await
                .unwrap();
        });

        let err = inserter
            .run(&dataset, stream, &CancellationToken::new())
            .await
            .unwrap_err();
        producer.await.unwrap();

        assert!(matches!(err, IngestError::InvalidRecord { line: 4, .. }));
        let stored = store.count_by_dataset(dataset.id).await.unwrap();
        assert!(stored == 0 || stored == 2, "stored {stored}");
        assert_ne!(stored, 3);
    }

    #[tokio::test]
    async fn test_pending_error_wins_over_final_flush() {
        let store = Arc::new(MemoryStore::new());
        let inserter = BatchInserter::new(store.clone(), 10);
        let dataset = dataset();
        let (record_tx, error_tx, stream) = channels();

        record_tx.send(record(0)).await.unwrap();
        error_tx.send(IngestError::Cancelled).await.unwrap();
        drop(record_tx);
        drop(error_tx);

        assert!(inserter.run(&dataset, stream, &CancellationToken::new()).await.is_err());
        assert_eq!(store.count_by_dataset(dataset.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let store = Arc::new(MemoryStore::new());
        let inserter = BatchInserter::new(store, 10);
        let (_record_tx, _error_tx, stream) = channels();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = inserter.run(&dataset(), stream, &cancel).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[tokio::test]
    async fn test_store_rejection_is_database_error() {
        let store = Arc::new(MemoryStore::new());
        let inserter = BatchInserter::new(store, 10);
        let (record_tx, error_tx, stream) = channels();
        record_tx.send(NameRecord::new(2023, "Ava", "X", 1)).await.unwrap();
        drop(record_tx);
        drop(error_tx);

        let err = inserter
            .run(&dataset(), stream, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Database(_)));
        assert!(!err.is_retryable());
    }
}
