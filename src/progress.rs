//! Sync progress reporting.
//!
//! The orchestrator emits a [`SyncProgressEvent`] after every record it
//! examines, so a long import shows which page it is on, how far into the
//! page it is, and the running totals. Human and JSON progress go to
//! **stderr** so stdout remains parseable for scripts; background runs
//! started over HTTP report through `tracing` instead.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use crate::run_state::{SyncCounters, SyncOutcome};

/// Snapshot emitted after each record.
#[derive(Clone, Debug, Serialize)]
pub struct RecordProgress {
    /// 1-based source page.
    pub page: u32,
    /// 1-based position of the record within the page.
    pub item_index: usize,
    pub items_in_page: usize,
    pub source_id: i64,
    pub last_title: String,
    /// What happened to the record (`written`, `unchanged`, `duplicate`, …).
    pub action: &'static str,
    pub counters: SyncCounters,
}

/// Lifecycle of a run as seen by a reporter.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    Started { reset: bool, page_size: usize },
    Record(RecordProgress),
    PageDone {
        page: u32,
        items: usize,
        counters: SyncCounters,
    },
    Finished {
        outcome: SyncOutcome,
        counters: SyncCounters,
    },
}

/// Receives progress events from the orchestrator.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync page 2  item 7/30  written 31  unchanged 12  Reset password".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Started { reset, page_size } => format!(
                "sync started  page size {}{}\n",
                page_size,
                if *reset { "  (reset)" } else { "" }
            ),
            SyncProgressEvent::Record(p) => format!(
                "sync page {}  item {}/{}  written {}  unchanged {}  {}\n",
                p.page,
                p.item_index,
                p.items_in_page,
                format_number(p.counters.written),
                format_number(p.counters.skipped_unchanged),
                p.last_title
            ),
            SyncProgressEvent::PageDone { page, items, .. } => {
                format!("sync page {} done  {} items\n", page, items)
            }
            SyncProgressEvent::Finished { outcome, counters } => format!(
                "sync {}  {} pages  {} written\n",
                match outcome {
                    SyncOutcome::Completed => "completed",
                    SyncOutcome::Failed => "failed",
                },
                format_number(counters.pages),
                format_number(counters.written)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One compact JSON object per event, tagged by `"event"`, on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Started { reset, page_size } => serde_json::json!({
                "event": "started",
                "reset": reset,
                "page_size": page_size
            }),
            SyncProgressEvent::Record(p) => serde_json::json!({
                "event": "progress",
                "record": p
            }),
            SyncProgressEvent::PageDone {
                page,
                items,
                counters,
            } => serde_json::json!({
                "event": "page_done",
                "page": page,
                "items": items,
                "counters": counters
            }),
            SyncProgressEvent::Finished { outcome, counters } => serde_json::json!({
                "event": "finished",
                "outcome": outcome,
                "counters": counters
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Reports page-level progress through `tracing`; per-record events are
/// logged at debug level.
pub struct LogProgress;

impl SyncProgressReporter for LogProgress {
    fn report(&self, event: SyncProgressEvent) {
        match event {
            SyncProgressEvent::Started { reset, page_size } => {
                info!(reset, page_size, "sync started")
            }
            SyncProgressEvent::Record(p) => tracing::debug!(
                page = p.page,
                item = p.item_index,
                items_in_page = p.items_in_page,
                source_id = p.source_id,
                action = p.action,
                "record processed"
            ),
            SyncProgressEvent::PageDone {
                page,
                items,
                counters,
            } => info!(
                page,
                items,
                written = counters.written,
                unchanged = counters.skipped_unchanged,
                "page done"
            ),
            SyncProgressEvent::Finished { outcome, counters } => info!(
                outcome = ?outcome,
                pages = counters.pages,
                written = counters.written,
                "sync finished"
            ),
        }
    }
}

/// Discards everything.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.char_indices() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Which reporter the `sync` command uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// `Human` when stderr is a terminal, `Off` when piped.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
