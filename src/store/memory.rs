//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Collection creation and
//! deletion take effect immediately.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::DestinationRecord;

use super::{CollectionSchema, VectorStore};

struct MemoryCollection {
    schema: CollectionSchema,
    records: HashMap<Uuid, DestinationRecord>,
}

/// In-memory store holding at most one collection.
pub struct InMemoryStore {
    collection: String,
    state: RwLock<Option<MemoryCollection>>,
}

impl InMemoryStore {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            state: RwLock::new(None),
        }
    }

    /// All stored records, ordered by source id.
    pub fn records(&self) -> Result<Vec<DestinationRecord>> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let mut records: Vec<DestinationRecord> = state
            .as_ref()
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.source_id);
        Ok(records)
    }

    pub fn schema(&self) -> Result<Option<CollectionSchema>> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.as_ref().map(|c| c.schema.clone()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.is_some())
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        if state.is_some() {
            bail!("collection '{}' already exists", self.collection);
        }
        *state = Some(MemoryCollection {
            schema: schema.clone(),
            records: HashMap::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        *state = None;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<DestinationRecord>> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let Some(collection) = state.as_ref() else {
            bail!("collection '{}' does not exist", self.collection);
        };
        Ok(collection.records.get(&id).cloned())
    }

    async fn upsert_batch(&self, records: &[DestinationRecord]) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let Some(collection) = state.as_mut() else {
            bail!("collection '{}' does not exist", self.collection);
        };

        let dims = collection.schema.vector_dims;
        for record in records {
            if let Some(vector) = &record.vector {
                if dims != 0 && vector.len() != dims {
                    bail!(
                        "record {} has a {}-dimensional vector, collection expects {}",
                        record.id,
                        vector.len(),
                        dims
                    );
                }
            }
        }

        for record in records {
            collection.records.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.as_ref().map(|c| c.records.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::destination_id;

    fn record(source_id: i64, title: &str) -> DestinationRecord {
        DestinationRecord {
            id: destination_id(source_id),
            source_id,
            title: title.into(),
            content: String::new(),
            summary: String::new(),
            status: "Published".into(),
            url: String::new(),
            category: "General".into(),
            created_at: None,
            updated_at: None,
            vector: Some(vec![1.0, 0.0]),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryStore::new("Article");
        store
            .create_collection(&CollectionSchema::articles("Article", 2))
            .await
            .unwrap();

        store.upsert_batch(&[record(1, "first")]).await.unwrap();
        store.upsert_batch(&[record(1, "second")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get_record(destination_id(1)).await.unwrap().unwrap();
        assert_eq!(stored.title, "second");
    }

    #[tokio::test]
    async fn rejects_wrong_dimensions_without_partial_write() {
        let store = InMemoryStore::new("Article");
        store
            .create_collection(&CollectionSchema::articles("Article", 3))
            .await
            .unwrap();
        let mut ok = record(1, "ok");
        ok.vector = Some(vec![1.0, 2.0, 3.0]);
        let bad = record(2, "bad");

        assert!(store.upsert_batch(&[ok, bad]).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_collection_is_an_error() {
        let store = InMemoryStore::new("Article");
        assert!(!store.collection_exists().await.unwrap());
        assert!(store.upsert_batch(&[record(1, "x")]).await.is_err());
        assert!(store.get_record(destination_id(1)).await.is_err());
    }

    #[tokio::test]
    async fn delete_drops_records() {
        let store = InMemoryStore::new("Article");
        store
            .create_collection(&CollectionSchema::articles("Article", 0))
            .await
            .unwrap();
        store.upsert_batch(&[record(1, "x")]).await.unwrap();
        store.delete_collection().await.unwrap();
        assert!(!store.collection_exists().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
