//! Destination vector store abstraction.
//!
//! The [`VectorStore`] trait covers the storage operations the sync engine
//! needs: collection lifecycle, point lookup by deterministic id, and batch
//! upsert. Backends:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | `memory` | [`memory`] | process-local, used by tests and dry setups |
//! | `sqlite` | [`sqlite`] | one table per collection, vectors as f32 BLOBs |
//! | `weaviate` | [`weaviate`] | REST API, one class per collection |
//!
//! Records cross the backend boundary as a flat property map (see
//! [`record_properties`] / [`record_from_properties`]) keyed by the field
//! names in [`ARTICLE_FIELDS`], plus the id and the optional vector.

pub mod memory;
pub mod sqlite;
pub mod weaviate;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::models::DestinationRecord;

/// Storage type of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    /// RFC 3339 timestamp in canonical form.
    Date,
}

/// One property of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

/// The canonical article field set.
pub const ARTICLE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "source_id",
        kind: FieldKind::Int,
        description: "Article id in the source system",
    },
    FieldSpec {
        name: "title",
        kind: FieldKind::Text,
        description: "Article title",
    },
    FieldSpec {
        name: "content",
        kind: FieldKind::Text,
        description: "Plain-text article body",
    },
    FieldSpec {
        name: "summary",
        kind: FieldKind::Text,
        description: "Short article summary",
    },
    FieldSpec {
        name: "status",
        kind: FieldKind::Text,
        description: "Publication status in the source system",
    },
    FieldSpec {
        name: "url",
        kind: FieldKind::Text,
        description: "Public article URL",
    },
    FieldSpec {
        name: "category",
        kind: FieldKind::Text,
        description: "Article category",
    },
    FieldSpec {
        name: "created_at",
        kind: FieldKind::Date,
        description: "Creation date",
    },
    FieldSpec {
        name: "updated_at",
        kind: FieldKind::Date,
        description: "Last update date",
    },
];

/// Shape of a collection: its properties and vector dimensionality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    /// Expected vector length; `0` when unknown (no embedding provider).
    pub vector_dims: usize,
}

impl CollectionSchema {
    pub fn articles(name: &str, vector_dims: usize) -> Self {
        Self {
            name: name.to_string(),
            fields: ARTICLE_FIELDS.to_vec(),
            vector_dims,
        }
    }
}

/// Abstract vector store backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_exists`](VectorStore::collection_exists) | Is the collection visible right now |
/// | [`create_collection`](VectorStore::create_collection) | Create with the given schema |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop the collection and its records |
/// | [`get_record`](VectorStore::get_record) | Point lookup by deterministic id |
/// | [`upsert_batch`](VectorStore::upsert_batch) | Create-or-replace a batch keyed by id |
/// | [`count`](VectorStore::count) | Number of stored records |
///
/// Collection creation and deletion may become visible asynchronously;
/// callers that need a settled state poll
/// [`collection_exists`](VectorStore::collection_exists) (see
/// [`crate::schema`]).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend label (`"memory"`, `"sqlite"`, `"weaviate"`).
    fn backend(&self) -> &str;

    /// Name of the collection this store writes to.
    fn collection(&self) -> &str;

    async fn collection_exists(&self) -> Result<bool>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    async fn delete_collection(&self) -> Result<()>;

    async fn get_record(&self, id: Uuid) -> Result<Option<DestinationRecord>>;

    /// Write every record, replacing any existing record with the same id.
    ///
    /// # Errors
    ///
    /// Fails if the collection is missing or any record is rejected. A
    /// failed batch may have been partially applied; re-running the sync
    /// converges because writes are keyed upserts.
    async fn upsert_batch(&self, records: &[DestinationRecord]) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Build the configured store backend.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryStore::new(&config.collection))),
        "sqlite" => Ok(Arc::new(sqlite::SqliteStore::open(config).await?)),
        "weaviate" => Ok(Arc::new(weaviate::WeaviateStore::new(config)?)),
        other => bail!(
            "Unknown store backend: '{}'. Available: memory, sqlite, weaviate",
            other
        ),
    }
}

/// Flatten a record into its property map (everything but id and vector).
pub fn record_properties(record: &DestinationRecord) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("source_id".into(), Value::from(record.source_id));
    props.insert("title".into(), Value::from(record.title.clone()));
    props.insert("content".into(), Value::from(record.content.clone()));
    props.insert("summary".into(), Value::from(record.summary.clone()));
    props.insert("status".into(), Value::from(record.status.clone()));
    props.insert("url".into(), Value::from(record.url.clone()));
    props.insert("category".into(), Value::from(record.category.clone()));
    props.insert("created_at".into(), optional_string(&record.created_at));
    props.insert("updated_at".into(), optional_string(&record.updated_at));
    props
}

/// Rebuild a record from a property map read back from a backend.
///
/// Missing text properties read as empty; `source_id` is required.
pub fn record_from_properties(
    id: Uuid,
    props: &Map<String, Value>,
    vector: Option<Vec<f32>>,
) -> Result<DestinationRecord> {
    let source_id = match props.get("source_id") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let Some(source_id) = source_id else {
        bail!("record {} has no usable source_id property", id);
    };

    let text = |key: &str| -> String {
        props
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let date = |key: &str| -> Option<String> {
        props
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(DestinationRecord {
        id,
        source_id,
        title: text("title"),
        content: text("content"),
        summary: text("summary"),
        status: text("status"),
        url: text("url"),
        category: text("category"),
        created_at: date("created_at"),
        updated_at: date("updated_at"),
        vector: vector.filter(|v| !v.is_empty()),
    })
}

fn optional_string(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::from(s.clone()),
        None => Value::Null,
    }
}
