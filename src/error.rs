//! Typed errors at the seams of the sync engine.
//!
//! Adapters return `anyhow::Result`; the orchestrator reports exactly one of
//! three outcomes to its callers: a summary, a [`ConcurrentSyncError`], or a
//! [`SyncError::Fatal`] carrying the counters collected before the failure.

use thiserror::Error;

use crate::run_state::SyncCounters;

/// A sync was requested while another one is running.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("a knowledge-base sync is already running")]
pub struct ConcurrentSyncError;

/// A store applied part of a batch and rejected the rest.
///
/// Returned through `anyhow` from [`VectorStore::upsert_batch`](crate::store::VectorStore::upsert_batch);
/// the batch writer downcasts it to count written and failed records separately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store rejected {rejected} of {attempted} records: {message}")]
pub struct PartialUpsertError {
    pub attempted: usize,
    pub rejected: usize,
    pub message: String,
}

impl PartialUpsertError {
    pub fn applied(&self) -> usize {
        self.attempted.saturating_sub(self.rejected)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    /// The store never reported the expected state within the polling budget.
    #[error("collection '{collection}' was not {expected} after {attempts} checks")]
    NotReady {
        collection: String,
        expected: &'static str,
        attempts: u32,
    },
    #[error("store error on collection '{collection}': {message}")]
    Store { collection: String, message: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Conflict(#[from] ConcurrentSyncError),
    #[error("sync failed: {message}")]
    Fatal {
        message: String,
        counters: SyncCounters,
    },
}

impl SyncError {
    pub fn fatal(message: impl Into<String>, counters: &SyncCounters) -> Self {
        SyncError::Fatal {
            message: message.into(),
            counters: *counters,
        }
    }

    /// Counters collected before a fatal failure.
    pub fn counters(&self) -> Option<&SyncCounters> {
        match self {
            SyncError::Conflict(_) => None,
            SyncError::Fatal { counters, .. } => Some(counters),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_keeps_partial_counters() {
        let counters = SyncCounters {
            pages: 2,
            written: 7,
            ..Default::default()
        };
        let err = SyncError::fatal("source unavailable", &counters);
        assert!(!err.is_conflict());
        assert_eq!(err.counters().unwrap().written, 7);
        assert_eq!(err.to_string(), "sync failed: source unavailable");
    }

    #[test]
    fn conflict_converts() {
        let err: SyncError = ConcurrentSyncError.into();
        assert!(err.is_conflict());
        assert!(err.counters().is_none());
    }
}
