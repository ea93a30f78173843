//! The process-wide sync run: counters, status, and the single-flight guard.
//!
//! A [`SyncRunHandle`] is cheap to clone and shared between the CLI, the
//! HTTP server, and the orchestrator. [`SyncRunHandle::try_begin`] does the
//! check-and-set of `in_progress` under the mutex and returns a
//! [`RunGuard`]; dropping the guard always releases the run, so an early
//! return or a panic cannot leave the engine stuck in `running`.
//!
//! The mutex is only held for field copies, never across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::ConcurrentSyncError;
use crate::timestamp::CanonicalInstant;

/// Running totals for one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    /// Source pages that returned at least one item.
    pub pages: u64,
    /// Records written by successful batch flushes.
    pub written: u64,
    pub skipped_unchanged: u64,
    /// Imported without a vector because the body was empty.
    pub skipped_no_content: u64,
    pub skipped_embedding_failure: u64,
    pub date_parse_failures: u64,
    /// List items examined.
    pub seen: u64,
    pub skipped_duplicate: u64,
    /// Detail fetch failed or returned nothing.
    pub skipped_source_error: u64,
    pub batch_failures: u64,
    /// Records lost in failed batches.
    pub records_failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    Failed,
}

/// Point-in-time view of the sync run, served by `GET /import/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunSnapshot {
    pub in_progress: bool,
    pub phase: SyncPhase,
    pub status_message: String,
    pub counters: SyncCounters,
    pub last_outcome: Option<SyncOutcome>,
    pub reset: bool,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Default for SyncRunSnapshot {
    fn default() -> Self {
        Self {
            in_progress: false,
            phase: SyncPhase::Idle,
            status_message: "Idle".to_string(),
            counters: SyncCounters::default(),
            last_outcome: None,
            reset: false,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Shared handle to the single sync run.
#[derive(Clone, Default)]
pub struct SyncRunHandle {
    inner: Arc<Mutex<SyncRunSnapshot>>,
}

impl SyncRunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the snapshot torn (every
    // update is a plain field assignment), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, SyncRunSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SyncRunSnapshot {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().in_progress
    }

    /// Claim the run. Fails without touching any state if a run is active.
    pub fn try_begin(&self, reset: bool) -> Result<RunGuard, ConcurrentSyncError> {
        let mut run = self.lock();
        if run.in_progress {
            return Err(ConcurrentSyncError);
        }

        run.in_progress = true;
        run.phase = SyncPhase::Running;
        run.status_message = "Sync started".to_string();
        run.counters = SyncCounters::default();
        run.reset = reset;
        run.started_at = Some(CanonicalInstant::now().to_canonical_string());
        run.finished_at = None;

        Ok(RunGuard {
            handle: self.clone(),
            finished: false,
        })
    }
}

/// Ownership of the active run. Releases the single-flight lock on drop.
pub struct RunGuard {
    handle: SyncRunHandle,
    finished: bool,
}

impl RunGuard {
    /// Publish running totals and a status line.
    pub fn publish(&self, counters: &SyncCounters, message: impl Into<String>) {
        let mut run = self.handle.lock();
        run.counters = *counters;
        run.status_message = message.into();
    }

    /// End the run with `outcome` and release the lock.
    pub fn finish(
        mut self,
        outcome: SyncOutcome,
        counters: &SyncCounters,
        message: impl Into<String>,
    ) -> SyncRunSnapshot {
        self.finished = true;
        let mut run = self.handle.lock();
        run.counters = *counters;
        run.status_message = message.into();
        release(&mut run, outcome);
        run.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut run = self.handle.lock();
        run.status_message = "Sync ended unexpectedly".to_string();
        release(&mut run, SyncOutcome::Failed);
    }
}

fn release(run: &mut SyncRunSnapshot, outcome: SyncOutcome) {
    run.in_progress = false;
    run.phase = SyncPhase::Idle;
    run.last_outcome = Some(outcome);
    run.finished_at = Some(CanonicalInstant::now().to_canonical_string());
}
