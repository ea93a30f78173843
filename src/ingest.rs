//! Sync orchestration.
//!
//! Coordinates a full run: claim the single-flight lock → ensure the
//! destination collection → page through the source → per record: change
//! detection, detail fetch, timestamp normalization, embedding, staging →
//! flush per page → release the lock.
//!
//! Record-level problems (a bad date, a failed detail fetch, an embedding
//! error) are counted and skipped. Only a source pagination failure, a
//! schema failure, or a failed batch under
//! [`BatchFailurePolicy::Abort`] end the run early; the error then carries
//! the counters collected so far.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batch::BatchWriter;
use crate::change::{self, ChangeReason};
use crate::config::{BatchFailurePolicy, Config, ReadinessConfig};
use crate::connector_helpdesk::HelpdeskConnector;
use crate::embedding::{self, EmbeddingFailure, EmbeddingProvider};
use crate::error::{ConcurrentSyncError, SyncError};
use crate::models::{destination_id, ArticleDetail, ArticleSummary, DestinationRecord};
use crate::progress::{RecordProgress, SyncProgressEvent, SyncProgressReporter};
use crate::run_state::{RunGuard, SyncCounters, SyncOutcome, SyncRunHandle, SyncRunSnapshot};
use crate::schema::ensure_schema;
use crate::store::{self, VectorStore};
use crate::timestamp::normalize;
use crate::traits::ArticleSource;

/// Tunables for a sync run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub page_size: usize,
    pub batch_size: usize,
    pub on_batch_failure: BatchFailurePolicy,
    pub article_base_url: String,
    pub default_category: String,
    pub readiness: ReadinessConfig,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.source.page_size,
            batch_size: config.sync.batch_size,
            on_batch_failure: config.sync.on_batch_failure,
            article_base_url: config.source.article_base_url.clone(),
            default_category: config.source.default_category.clone(),
            readiness: config.store.readiness.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 30,
            batch_size: 30,
            on_batch_failure: BatchFailurePolicy::Continue,
            article_base_url: "http://localhost/article".to_string(),
            default_category: crate::models::DEFAULT_CATEGORY.to_string(),
            readiness: ReadinessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Drop and recreate the collection, then import every article.
    pub reset: bool,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub collection: String,
    pub reset: bool,
    pub counters: SyncCounters,
    pub elapsed_ms: u64,
}

/// What happened to one listed article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordAction {
    Staged { full: bool },
    Unchanged,
    Duplicate,
    SourceError,
    EmbeddingFailed,
}

impl RecordAction {
    fn as_str(&self) -> &'static str {
        match self {
            RecordAction::Staged { .. } => "staged",
            RecordAction::Unchanged => "unchanged",
            RecordAction::Duplicate => "duplicate",
            RecordAction::SourceError => "source_error",
            RecordAction::EmbeddingFailed => "embedding_failed",
        }
    }
}

/// Per-run scratch state.
struct RunContext {
    reset: bool,
    counters: SyncCounters,
    seen_ids: HashSet<i64>,
    writer: BatchWriter,
}

/// The sync orchestrator.
///
/// Holds its collaborators behind trait objects and shares a
/// [`SyncRunHandle`] with whoever needs the status (CLI, HTTP server).
pub struct Importer {
    source: Arc<dyn ArticleSource>,
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    settings: SyncSettings,
    run: SyncRunHandle,
}

impl Importer {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            embedder,
            settings,
            run: SyncRunHandle::new(),
        }
    }

    /// Share an existing run handle instead of a fresh one.
    pub fn with_run_handle(mut self, run: SyncRunHandle) -> Self {
        self.run = run;
        self
    }

    /// Wire the help-desk connector, the configured store, and the
    /// configured embedding provider.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let source: Arc<dyn ArticleSource> = Arc::new(HelpdeskConnector::new(&config.source)?);
        let store = store::create_store(&config.store).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::new(
            source,
            store,
            embedder,
            SyncSettings::from_config(config),
        ))
    }

    pub fn run_handle(&self) -> &SyncRunHandle {
        &self.run
    }

    pub fn status(&self) -> SyncRunSnapshot {
        self.run.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Run a sync to completion on the current task.
    ///
    /// # Errors
    ///
    /// [`SyncError::Conflict`] if a run is already active (nothing is
    /// touched), [`SyncError::Fatal`] with partial counters otherwise.
    pub async fn run(
        &self,
        options: SyncOptions,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncReport, SyncError> {
        let guard = self.run.try_begin(options.reset)?;
        self.execute(guard, options, progress).await
    }

    /// Claim the run now and continue it on a spawned task.
    ///
    /// Returns the snapshot taken right after the lock was acquired, so a
    /// conflict is reported to the caller synchronously.
    pub fn start_background(
        self: &Arc<Self>,
        options: SyncOptions,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> Result<SyncRunSnapshot, ConcurrentSyncError> {
        let guard = self.run.try_begin(options.reset)?;
        let snapshot = self.run.snapshot();

        let importer = Arc::clone(self);
        tokio::spawn(async move {
            match importer.execute(guard, options, progress.as_ref()).await {
                Ok(report) => info!(
                    written = report.counters.written,
                    elapsed_ms = report.elapsed_ms,
                    "background sync completed"
                ),
                Err(e) => error!(error = %e, "background sync failed"),
            }
        });

        Ok(snapshot)
    }

    async fn execute(
        &self,
        guard: RunGuard,
        options: SyncOptions,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let mut ctx = RunContext {
            reset: options.reset,
            counters: SyncCounters::default(),
            seen_ids: HashSet::new(),
            writer: BatchWriter::new(self.settings.batch_size),
        };

        info!(
            source = self.source.name(),
            store = self.store.backend(),
            collection = self.store.collection(),
            reset = options.reset,
            "sync started"
        );
        progress.report(SyncProgressEvent::Started {
            reset: options.reset,
            page_size: self.settings.page_size,
        });

        let dims = self.embedder.as_ref().map(|e| e.dims()).unwrap_or(0);
        if let Err(e) = ensure_schema(
            self.store.as_ref(),
            options.reset,
            dims,
            &self.settings.readiness,
        )
        .await
        {
            return Err(fail(guard, &ctx.counters, e.to_string(), progress));
        }

        let mut page: u32 = 1;
        loop {
            let items = match self.source.list_page(page, self.settings.page_size).await {
                Ok(items) => items,
                Err(e) => {
                    let message = format!("source page {} failed: {:#}", page, e);
                    return Err(fail(guard, &ctx.counters, message, progress));
                }
            };
            if items.is_empty() {
                debug!(page, "empty page, end of data");
                break;
            }

            ctx.counters.pages += 1;
            let items_in_page = items.len();

            for (index, summary) in items.iter().enumerate() {
                ctx.counters.seen += 1;
                let action = self.process(&mut ctx, summary).await;

                if let RecordAction::Staged { full: true } = action {
                    if let Err(message) = self.flush(&mut ctx, page).await {
                        return Err(fail(guard, &ctx.counters, message, progress));
                    }
                }

                guard.publish(
                    &ctx.counters,
                    format!(
                        "Page {}: {}/{} {}",
                        page,
                        index + 1,
                        items_in_page,
                        summary.title
                    ),
                );
                progress.report(SyncProgressEvent::Record(RecordProgress {
                    page,
                    item_index: index + 1,
                    items_in_page,
                    source_id: summary.source_id,
                    last_title: summary.title.clone(),
                    action: action.as_str(),
                    counters: ctx.counters,
                }));
            }

            if let Err(message) = self.flush(&mut ctx, page).await {
                return Err(fail(guard, &ctx.counters, message, progress));
            }
            guard.publish(&ctx.counters, format!("Page {} done", page));
            progress.report(SyncProgressEvent::PageDone {
                page,
                items: items_in_page,
                counters: ctx.counters,
            });

            page += 1;
        }

        let counters = ctx.counters;
        let message = format!(
            "Completed: {} written, {} unchanged, {} without content, {} embedding failures",
            counters.written,
            counters.skipped_unchanged,
            counters.skipped_no_content,
            counters.skipped_embedding_failure
        );
        guard.finish(SyncOutcome::Completed, &counters, message);
        progress.report(SyncProgressEvent::Finished {
            outcome: SyncOutcome::Completed,
            counters,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            pages = counters.pages,
            written = counters.written,
            skipped_unchanged = counters.skipped_unchanged,
            skipped_no_content = counters.skipped_no_content,
            skipped_embedding_failure = counters.skipped_embedding_failure,
            date_parse_failures = counters.date_parse_failures,
            batch_failures = counters.batch_failures,
            elapsed_ms,
            "sync completed"
        );

        Ok(SyncReport {
            collection: self.store.collection().to_string(),
            reset: options.reset,
            counters,
            elapsed_ms,
        })
    }

    async fn process(&self, ctx: &mut RunContext, summary: &ArticleSummary) -> RecordAction {
        let source_id = summary.source_id;

        if !ctx.seen_ids.insert(source_id) {
            debug!(source_id, "article listed twice, skipping");
            ctx.counters.skipped_duplicate += 1;
            return RecordAction::Duplicate;
        }

        let mut decision = change::needs_import(self.store.as_ref(), summary, ctx.reset).await;
        let mut decided_on = summary.updated_at_raw.clone();
        let mut prefetched = None;
        if decision.reason == (ChangeReason::NoSourceTimestamp { unparseable: false }) {
            // The list omitted the date: decide on the detail's instead.
            let Some(detail) = self.fetch_detail(ctx, source_id).await else {
                return RecordAction::SourceError;
            };
            if detail.updated_at_raw.is_some() {
                let dated = ArticleSummary {
                    updated_at_raw: detail.updated_at_raw.clone(),
                    ..summary.clone()
                };
                decision = change::needs_import(self.store.as_ref(), &dated, ctx.reset).await;
                decided_on = dated.updated_at_raw;
            }
            prefetched = Some(detail);
        }

        if decision.reason.is_date_parse_failure() {
            ctx.counters.date_parse_failures += 1;
        }
        if !decision.needs_import {
            ctx.counters.skipped_unchanged += 1;
            return RecordAction::Unchanged;
        }
        debug!(source_id, reason = decision.reason.as_str(), "importing article");

        let mut detail = match prefetched {
            Some(detail) => detail,
            None => match self.fetch_detail(ctx, source_id).await {
                Some(detail) => detail,
                None => return RecordAction::SourceError,
            },
        };
        // A bad date the change detector saw was already counted.
        let decided_date_failed = matches!(
            decision.reason,
            ChangeReason::NoSourceTimestamp { unparseable: true }
        );
        let detail_date_differs =
            detail.updated_at_raw.is_some() && detail.updated_at_raw != decided_on;
        detail.merge_summary(summary);

        let vector = if !detail.has_body() {
            debug!(source_id, "article has no body, storing metadata only");
            ctx.counters.skipped_no_content += 1;
            None
        } else if let Some(embedder) = &self.embedder {
            match embedding::embed(embedder.as_ref(), &detail.body_text).await {
                Ok(vector) => Some(vector),
                Err(EmbeddingFailure::EmptyInput) => {
                    ctx.counters.skipped_no_content += 1;
                    None
                }
                Err(failure) => {
                    warn!(source_id, reason = failure.reason(), error = %failure, "embedding failed, keeping previous record");
                    ctx.counters.skipped_embedding_failure += 1;
                    return RecordAction::EmbeddingFailed;
                }
            }
        } else {
            None
        };

        let count_updated_failure = !decided_date_failed || detail_date_differs;
        let record = self.build_record(
            source_id,
            &detail,
            vector,
            count_updated_failure,
            &mut ctx.counters,
        );
        let full = ctx.writer.stage(record);
        RecordAction::Staged { full }
    }

    /// Fetch the full article; a missing or failed detail is counted as a
    /// source error.
    async fn fetch_detail(&self, ctx: &mut RunContext, source_id: i64) -> Option<ArticleDetail> {
        match self.source.get_detail(source_id).await {
            Ok(Some(detail)) => Some(detail),
            Ok(None) => {
                warn!(source_id, "article listed but detail not found");
                ctx.counters.skipped_source_error += 1;
                None
            }
            Err(e) => {
                warn!(source_id, error = %format!("{:#}", e), "detail fetch failed");
                ctx.counters.skipped_source_error += 1;
                None
            }
        }
    }

    fn build_record(
        &self,
        source_id: i64,
        detail: &ArticleDetail,
        vector: Option<Vec<f32>>,
        count_updated_failure: bool,
        counters: &mut SyncCounters,
    ) -> DestinationRecord {
        let created_at = canonical(source_id, "created_at", detail.created_at_raw.as_deref())
            .unwrap_or_else(|| {
                counters.date_parse_failures += 1;
                None
            });
        let updated_at = canonical(source_id, "updated_at", detail.updated_at_raw.as_deref())
            .unwrap_or_else(|| {
                if count_updated_failure {
                    counters.date_parse_failures += 1;
                }
                None
            });

        DestinationRecord {
            id: destination_id(source_id),
            source_id,
            title: detail.title.clone(),
            content: detail.body_text.clone(),
            summary: detail.summary.clone(),
            status: detail.status().to_string(),
            url: detail.resolved_url(&self.settings.article_base_url),
            category: detail.category(&self.settings.default_category).to_string(),
            created_at,
            updated_at,
            vector,
        }
    }

    /// Flush staged records. `Err` only under the abort policy.
    async fn flush(&self, ctx: &mut RunContext, page: u32) -> Result<(), String> {
        let outcome = ctx.writer.flush(self.store.as_ref(), page).await;
        ctx.counters.written += outcome.written as u64;

        if let Some(message) = outcome.error {
            ctx.counters.batch_failures += 1;
            ctx.counters.records_failed += outcome.failed as u64;
            if self.settings.on_batch_failure == BatchFailurePolicy::Abort {
                return Err(format!("batch upsert failed on page {}: {}", page, message));
            }
        }
        Ok(())
    }
}

/// Normalize an optional raw date.
///
/// `Some(Some(_))` parsed, `Some(None)` absent, `None` unparseable.
fn canonical(source_id: i64, field: &str, raw: Option<&str>) -> Option<Option<String>> {
    let Some(raw) = raw else {
        return Some(None);
    };
    match normalize(raw) {
        Ok(instant) => Some(Some(instant.to_canonical_string())),
        Err(e) => {
            warn!(source_id, field, raw, error = %e, "unparseable date, storing none");
            None
        }
    }
}

fn fail(
    guard: RunGuard,
    counters: &SyncCounters,
    message: String,
    progress: &dyn SyncProgressReporter,
) -> SyncError {
    error!(error = %message, "sync failed");
    guard.finish(SyncOutcome::Failed, counters, format!("Failed: {}", message));
    progress.report(SyncProgressEvent::Finished {
        outcome: SyncOutcome::Failed,
        counters: *counters,
    });
    SyncError::fatal(message, counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_distinguishes_absent_from_unparseable() {
        assert_eq!(canonical(1, "updated_at", None), Some(None));
        assert_eq!(
            canonical(1, "updated_at", Some("2024-01-02T03:04:05.1234567")),
            Some(Some("2024-01-02T03:04:05.123456Z".to_string()))
        );
        assert_eq!(canonical(1, "updated_at", Some("not a date")), None);
    }

    #[test]
    fn actions_have_stable_labels() {
        assert_eq!(RecordAction::Staged { full: false }.as_str(), "staged");
        assert_eq!(RecordAction::EmbeddingFailed.as_str(), "embedding_failed");
    }
}
