//! Destination collection lifecycle.
//!
//! [`ensure_schema`] makes sure the article collection exists before a run
//! writes to it, dropping and recreating it first when a reset was asked
//! for. Stores may apply schema changes asynchronously, so after each
//! change the collection state is polled (bounded by
//! [`ReadinessConfig`]) until the change is visible.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::ReadinessConfig;
use crate::error::SchemaError;
use crate::store::{CollectionSchema, VectorStore};

/// What [`ensure_schema`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    /// The collection already existed and was left alone.
    Kept,
    Created,
    /// Dropped and created again (reset).
    Recreated,
}

pub async fn ensure_schema(
    store: &dyn VectorStore,
    reset: bool,
    vector_dims: usize,
    readiness: &ReadinessConfig,
) -> Result<SchemaAction, SchemaError> {
    let collection = store.collection().to_string();
    let store_err = |e: anyhow::Error| SchemaError::Store {
        collection: collection.clone(),
        message: format!("{:#}", e),
    };

    let exists = store.collection_exists().await.map_err(store_err)?;

    if exists && !reset {
        debug!(%collection, "collection present, keeping it");
        return Ok(SchemaAction::Kept);
    }

    if exists {
        info!(%collection, "reset requested, dropping collection");
        store.delete_collection().await.map_err(store_err)?;
        wait_until(store, false, readiness).await?;
    }

    let schema = CollectionSchema::articles(&collection, vector_dims);
    store.create_collection(&schema).await.map_err(store_err)?;
    wait_until(store, true, readiness).await?;
    info!(%collection, vector_dims, "collection created");

    Ok(if exists {
        SchemaAction::Recreated
    } else {
        SchemaAction::Created
    })
}

/// Poll until the collection's existence equals `present`.
async fn wait_until(
    store: &dyn VectorStore,
    present: bool,
    readiness: &ReadinessConfig,
) -> Result<(), SchemaError> {
    let interval = Duration::from_millis(readiness.poll_interval_ms);

    for attempt in 1..=readiness.max_attempts {
        match store.collection_exists().await {
            Ok(exists) if exists == present => return Ok(()),
            Ok(_) => debug!(attempt, present, "collection not settled yet"),
            Err(e) => debug!(attempt, error = %e, "collection check failed"),
        }
        if attempt < readiness.max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(SchemaError::NotReady {
        collection: store.collection().to_string(),
        expected: if present { "present" } else { "absent" },
        attempts: readiness.max_attempts,
    })
}
