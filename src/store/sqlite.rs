//! SQLite-backed [`VectorStore`].
//!
//! Each collection is a table named after it. Properties become columns
//! (see [`ARTICLE_FIELDS`](super::ARTICLE_FIELDS)); the vector is a BLOB of
//! little-endian `f32`s (see [`vec_to_blob`]). Collection metadata (the
//! expected vector dimensionality) lives in `kb_collections`.
//!
//! A batch is written in one transaction with `ON CONFLICT(id) DO UPDATE`,
//! so it is applied entirely or not at all.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::DestinationRecord;

use super::{
    record_from_properties, record_properties, CollectionSchema, FieldKind, VectorStore,
    ARTICLE_FIELDS,
};

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open the database named by `store.path`.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let Some(path) = config.path.as_ref() else {
            bail!("store.path is required for the sqlite backend");
        };
        let pool = db::connect(path, config.timeout_secs).await?;
        Self::from_pool(pool, &config.collection).await
    }

    /// Wrap an existing pool. Creates the metadata table if missing.
    pub async fn from_pool(pool: SqlitePool, collection: &str) -> Result<Self> {
        validate_identifier(collection)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_collections (
                name TEXT PRIMARY KEY,
                vector_dims INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Vector dimensionality recorded at creation, or `None` if the
    /// collection does not exist.
    async fn vector_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT vector_dims FROM kb_collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d.max(0) as usize))
    }
}

/// Collection names are spliced into SQL, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!(
            "invalid collection name '{}': use letters, digits and underscores",
            name
        );
    }
    if name.eq_ignore_ascii_case("kb_collections") {
        bail!("collection name '{}' is reserved", name);
    }
    Ok(())
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "TEXT NOT NULL DEFAULT ''",
        FieldKind::Int => "INTEGER",
        FieldKind::Date => "TEXT",
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(&self.collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        if schema.name != self.collection {
            bail!(
                "schema is for '{}' but this store writes '{}'",
                schema.name,
                self.collection
            );
        }

        let columns: Vec<String> = schema
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, column_type(f.kind)))
            .collect();
        let create = format!(
            "CREATE TABLE \"{}\" (id TEXT PRIMARY KEY, {}, vector BLOB, vector_dims INTEGER)",
            self.collection,
            columns.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&create).execute(&mut *tx).await?;
        sqlx::query(
            r#"
            INSERT INTO kb_collections (name, vector_dims, created_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET vector_dims = excluded.vector_dims, created_at = excluded.created_at
            "#,
        )
        .bind(&self.collection)
        .bind(schema.vector_dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", self.collection))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kb_collections WHERE name = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<DestinationRecord>> {
        let sql = format!("SELECT * FROM \"{}\" WHERE id = ?", self.collection);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut props = Map::new();
        for field in ARTICLE_FIELDS {
            let value = match field.kind {
                FieldKind::Int => row
                    .try_get::<Option<i64>, _>(field.name)?
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                FieldKind::Text | FieldKind::Date => row
                    .try_get::<Option<String>, _>(field.name)?
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            };
            props.insert(field.name.to_string(), value);
        }
        let vector = row
            .try_get::<Option<Vec<u8>>, _>("vector")?
            .map(|blob| blob_to_vec(&blob));

        record_from_properties(id, &props, vector).map(Some)
    }

    async fn upsert_batch(&self, records: &[DestinationRecord]) -> Result<()> {
        let Some(dims) = self.vector_dims().await? else {
            bail!("collection '{}' does not exist", self.collection);
        };

        let mut tx = self.pool.begin().await?;

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

            let props = record_properties(record);
            let columns: Vec<&str> = props.keys().map(String::as_str).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let updates: Vec<String> = columns
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            let sql = format!(
                "INSERT INTO \"{}\" (id, {}, vector, vector_dims) VALUES (?, {}, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET {}, vector = excluded.vector, vector_dims = excluded.vector_dims",
                self.collection,
                columns.join(", "),
                placeholders,
                updates.join(", ")
            );

            let mut query = sqlx::query(&sql).bind(record.id.to_string());
            for value in props.values() {
                query = match value {
                    Value::Number(n) => query.bind(n.as_i64()),
                    Value::String(s) => query.bind(s.clone()),
                    _ => query.bind(None::<String>),
                };
            }
            query
                .bind(record.vector.as_deref().map(vec_to_blob))
                .bind(record.vector.as_ref().map(|v| v.len() as i64))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        if !self.collection_exists().await? {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", self.collection))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
