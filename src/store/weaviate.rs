//! Weaviate REST backend.
//!
//! One Weaviate class per collection, created with `vectorizer: "none"` so
//! vectors always come from the configured embedding provider.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists | `GET /v1/schema/{class}` (`404` means absent) |
//! | create | `POST /v1/schema` |
//! | delete | `DELETE /v1/schema/{class}` |
//! | get | `GET /v1/objects/{class}/{id}?include=vector` |
//! | upsert | `POST /v1/batch/objects` |
//! | count | `POST /v1/graphql` (`Aggregate { Class { meta { count } } }`) |
//!
//! Schema changes are eventually visible on multi-node clusters; the sync
//! engine polls [`collection_exists`](VectorStore::collection_exists) after
//! dropping or creating a class.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::PartialUpsertError;
use crate::http;
use crate::models::DestinationRecord;

use super::{
    record_from_properties, record_properties, CollectionSchema, FieldKind, VectorStore,
};

const MAX_RETRIES: u32 = 3;

pub struct WeaviateStore {
    base_url: String,
    class: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WeaviateStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let Some(url) = config.url.as_ref() else {
            bail!("store.url is required for the weaviate backend");
        };
        let api_key = match &config.api_key_env {
            Some(var) => {
                let key = std::env::var(var).ok();
                if key.is_none() {
                    warn!(env = %var, "Weaviate API key variable not set; connecting anonymously");
                }
                key
            }
            None => None,
        };
        Self::with_api_key(url, &config.collection, api_key, config.timeout_secs)
    }

    pub fn with_api_key(
        url: &str,
        class: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            class: class.to_string(),
            api_key,
            client: http::client(timeout_secs)?,
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn schema_body(&self, schema: &CollectionSchema) -> Value {
        let properties: Vec<Value> = schema
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "dataType": [data_type(f.kind)],
                    "description": f.description,
                })
            })
            .collect();
        json!({
            "class": schema.name,
            "vectorizer": "none",
            "properties": properties,
        })
    }
}

fn data_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Int => "int",
        FieldKind::Date => "date",
    }
}

async fn error_text(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

#[async_trait]
impl VectorStore for WeaviateStore {
    fn backend(&self) -> &str {
        "weaviate"
    }

    fn collection(&self) -> &str {
        &self.class
    }

    async fn collection_exists(&self) -> Result<bool> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.class);
        let response = http::send_with_retry("weaviate schema", MAX_RETRIES, || {
            self.authed(self.client.get(&url))
        })
        .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => bail!(
                "weaviate schema error {}: {}",
                status,
                error_text(response).await
            ),
        }
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let url = format!("{}/v1/schema", self.base_url);
        let body = self.schema_body(schema);
        let response = http::send_with_retry("weaviate create class", MAX_RETRIES, || {
            self.authed(self.client.post(&url)).json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "weaviate create class '{}' failed {}: {}",
                schema.name,
                status,
                error_text(response).await
            );
        }
        debug!(class = %schema.name, "weaviate class created");
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.class);
        let response = http::send_with_retry("weaviate delete class", MAX_RETRIES, || {
            self.authed(self.client.delete(&url))
        })
        .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            bail!(
                "weaviate delete class '{}' failed {}: {}",
                self.class,
                status,
                error_text(response).await
            );
        }
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<DestinationRecord>> {
        let url = format!("{}/v1/objects/{}/{}", self.base_url, self.class, id);
        let response = http::send_with_retry("weaviate get object", MAX_RETRIES, || {
            self.authed(self.client.get(&url))
                .query(&[("include", "vector")])
        })
        .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!(
                "weaviate get object {} failed {}: {}",
                id,
                status,
                error_text(response).await
            );
        }

        let json: Value = response.json().await?;
        let props = json
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let vector = json.get("vector").and_then(Value::as_array).map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect::<Vec<f32>>()
        });

        record_from_properties(id, &props, vector).map(Some)
    }

    async fn upsert_batch(&self, records: &[DestinationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let objects: Vec<Value> = records
            .iter()
            .map(|record| {
                // Weaviate rejects explicit nulls for typed properties.
                let props: Map<String, Value> = record_properties(record)
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                let mut object = json!({
                    "class": self.class,
                    "id": record.id.to_string(),
                    "properties": props,
                });
                if let Some(vector) = &record.vector {
                    object["vector"] = json!(vector);
                }
                object
            })
            .collect();
        let body = json!({ "objects": objects });

        let url = format!("{}/v1/batch/objects", self.base_url);
        let response = http::send_with_retry("weaviate batch", MAX_RETRIES, || {
            self.authed(self.client.post(&url)).json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "weaviate batch failed {}: {}",
                status,
                error_text(response).await
            );
        }

        let results: Value = response
            .json()
            .await
            .context("weaviate batch returned an unreadable body")?;
        let errors = object_errors(&results);
        if !errors.is_empty() {
            // Objects without errors in the response were stored.
            return Err(PartialUpsertError {
                attempted: records.len(),
                rejected: errors.len().min(records.len()),
                message: errors.join("; "),
            }
            .into());
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let query = format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", self.class);
        let url = format!("{}/v1/graphql", self.base_url);
        let body = json!({ "query": query });
        let response = http::send_with_retry("weaviate aggregate", MAX_RETRIES, || {
            self.authed(self.client.post(&url)).json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "weaviate aggregate failed {}: {}",
                status,
                error_text(response).await
            );
        }
        let json: Value = response.json().await?;
        Ok(json
            .pointer(&format!("/data/Aggregate/{}/0/meta/count", self.class))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

/// Collect per-object error messages from a batch response.
fn object_errors(results: &Value) -> Vec<String> {
    let Some(items) = results.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let messages: Vec<String> = item
                .pointer("/result/errors/error")?
                .as_array()?
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if messages.is_empty() {
                return None;
            }
            let id = item.get("id").and_then(Value::as_str).unwrap_or("?");
            Some(format!("{}: {}", id, messages.join(", ")))
        })
        .collect()
}
