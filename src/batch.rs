//! Bounded batch accumulation and upsert.

use tracing::{debug, error};

use crate::error::PartialUpsertError;
use crate::models::DestinationRecord;
use crate::store::VectorStore;

/// Result of one [`BatchWriter::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub written: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl FlushOutcome {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Accumulates destination records and writes them in bounded batches.
///
/// Metadata-only records (no vector) are staged like any other. A failed
/// upsert is logged and reported in the [`FlushOutcome`] and never leaves
/// records staged. When the store reports a [`PartialUpsertError`], the
/// applied records count as written and only the rejected ones as failed.
pub struct BatchWriter {
    max_batch_size: usize,
    staged: Vec<DestinationRecord>,
}

impl BatchWriter {
    pub fn new(max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            staged: Vec::with_capacity(max_batch_size),
        }
    }

    /// Stage a record. Returns `true` when the batch is full and should be
    /// flushed.
    pub fn stage(&mut self, record: DestinationRecord) -> bool {
        self.staged.push(record);
        self.staged.len() >= self.max_batch_size
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Upsert everything staged and clear the batch.
    pub async fn flush(&mut self, store: &dyn VectorStore, page: u32) -> FlushOutcome {
        if self.staged.is_empty() {
            return FlushOutcome::default();
        }
        let batch = std::mem::take(&mut self.staged);
        let batch_size = batch.len();

        match store.upsert_batch(&batch).await {
            Ok(()) => {
                debug!(page, batch_size, "batch written");
                FlushOutcome {
                    written: batch_size,
                    failed: 0,
                    error: None,
                }
            }
            Err(e) => {
                let ids: Vec<i64> = batch.iter().map(|r| r.source_id).collect();
                let (written, failed) = match e.downcast_ref::<PartialUpsertError>() {
                    Some(partial) => (partial.applied(), partial.rejected),
                    None => (0, batch_size),
                };
                error!(
                    page,
                    batch_size,
                    written,
                    failed,
                    source_ids = ?ids,
                    error = %format!("{:#}", e),
                    "batch upsert failed"
                );
                FlushOutcome {
                    written,
                    failed,
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::destination_id;
    use crate::store::memory::InMemoryStore;
    use crate::store::CollectionSchema;

    fn record(source_id: i64, vector: Option<Vec<f32>>) -> DestinationRecord {
        DestinationRecord {
            id: destination_id(source_id),
            source_id,
            title: format!("Article {}", source_id),
            content: String::new(),
            summary: String::new(),
            status: "Published".into(),
            url: String::new(),
            category: "General".into(),
            created_at: None,
            updated_at: None,
            vector,
        }
    }

    async fn store(dims: usize) -> InMemoryStore {
        let store = InMemoryStore::new("Article");
        store
            .create_collection(&CollectionSchema::articles("Article", dims))
            .await
            .unwrap();
        store
    }

    #[test]
    fn stage_reports_full_batch() {
        let mut writer = BatchWriter::new(2);
        assert!(!writer.stage(record(1, None)));
        assert!(writer.stage(record(2, None)));
        assert_eq!(writer.len(), 2);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        assert_eq!(BatchWriter::new(0).max_batch_size(), 1);
    }

    #[tokio::test]
    async fn flush_writes_and_clears() {
        let store = store(2).await;
        let mut writer = BatchWriter::new(10);
        writer.stage(record(1, Some(vec![1.0, 0.0])));
        writer.stage(record(2, None));

        let outcome = writer.flush(&store, 1).await;
        assert_eq!(outcome.written, 2);
        assert!(!outcome.is_failure());
        assert!(writer.is_empty());
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.records().unwrap()[1].vector, None);
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let store = store(2).await;
        let mut writer = BatchWriter::new(10);
        assert_eq!(writer.flush(&store, 1).await, FlushOutcome::default());
    }

    #[tokio::test]
    async fn failed_flush_reports_and_clears() {
        let store = store(2).await;
        let mut writer = BatchWriter::new(10);
        writer.stage(record(1, Some(vec![1.0, 0.0])));
        writer.stage(record(2, Some(vec![1.0])));

        let outcome = writer.flush(&store, 3).await;
        assert!(outcome.is_failure());
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.written, 0);
        assert!(writer.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    /// Applies even source ids and rejects odd ones in the same call.
    struct RejectsOdd(InMemoryStore);

    #[async_trait::async_trait]
    impl VectorStore for RejectsOdd {
        fn backend(&self) -> &str {
            "rejects-odd"
        }
        fn collection(&self) -> &str {
            self.0.collection()
        }
        async fn collection_exists(&self) -> anyhow::Result<bool> {
            self.0.collection_exists().await
        }
        async fn create_collection(&self, schema: &CollectionSchema) -> anyhow::Result<()> {
            self.0.create_collection(schema).await
        }
        async fn delete_collection(&self) -> anyhow::Result<()> {
            self.0.delete_collection().await
        }
        async fn get_record(&self, id: uuid::Uuid) -> anyhow::Result<Option<DestinationRecord>> {
            self.0.get_record(id).await
        }
        async fn upsert_batch(&self, records: &[DestinationRecord]) -> anyhow::Result<()> {
            let (odd, even): (Vec<_>, Vec<_>) =
                records.iter().cloned().partition(|r| r.source_id % 2 == 1);
            self.0.upsert_batch(&even).await?;
            if odd.is_empty() {
                return Ok(());
            }
            Err(PartialUpsertError {
                attempted: records.len(),
                rejected: odd.len(),
                message: "odd id".into(),
            }
            .into())
        }
        async fn count(&self) -> anyhow::Result<u64> {
            self.0.count().await
        }
    }

    #[tokio::test]
    async fn partial_rejection_counts_per_record() {
        let store = RejectsOdd(store(2).await);
        let mut writer = BatchWriter::new(10);
        for id in 1..=4 {
            writer.stage(record(id, None));
        }

        let outcome = writer.flush(&store, 1).await;
        assert!(outcome.is_failure());
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failed, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
