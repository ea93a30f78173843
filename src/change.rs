//! Change detection: does a listed article need to be (re)imported?
//!
//! Compares the source's last-modified date against the `updated_at` of the
//! destination record with the same deterministic id. Whenever the answer is
//! uncertain (unparseable dates, a failed lookup) the article is imported.

use tracing::debug;

use crate::models::{destination_id, ArticleSummary};
use crate::store::VectorStore;
use crate::timestamp::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    Reset,
    /// No destination record with this id.
    New,
    /// Source date missing, or present but unparseable.
    NoSourceTimestamp { unparseable: bool },
    /// Destination date missing, or present but unparseable.
    NoDestinationTimestamp { unparseable: bool },
    TimestampDiverged,
    Unchanged,
    LookupFailed(String),
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::Reset => "reset",
            ChangeReason::New => "new",
            ChangeReason::NoSourceTimestamp { .. } => "no_source_timestamp",
            ChangeReason::NoDestinationTimestamp { .. } => "no_destination_timestamp",
            ChangeReason::TimestampDiverged => "timestamp_diverged",
            ChangeReason::Unchanged => "unchanged",
            ChangeReason::LookupFailed(_) => "lookup_failed",
        }
    }

    /// A date was present but could not be parsed.
    pub fn is_date_parse_failure(&self) -> bool {
        matches!(
            self,
            ChangeReason::NoSourceTimestamp { unparseable: true }
                | ChangeReason::NoDestinationTimestamp { unparseable: true }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDecision {
    pub needs_import: bool,
    pub reason: ChangeReason,
}

impl ChangeDecision {
    fn import(reason: ChangeReason) -> Self {
        Self {
            needs_import: true,
            reason,
        }
    }
}

pub async fn needs_import(
    store: &dyn VectorStore,
    summary: &ArticleSummary,
    reset: bool,
) -> ChangeDecision {
    if reset {
        return ChangeDecision::import(ChangeReason::Reset);
    }

    let existing = match store.get_record(destination_id(summary.source_id)).await {
        Ok(Some(record)) => record,
        Ok(None) => return ChangeDecision::import(ChangeReason::New),
        Err(e) => {
            debug!(source_id = summary.source_id, error = %e, "destination lookup failed");
            return ChangeDecision::import(ChangeReason::LookupFailed(format!("{:#}", e)));
        }
    };

    let source = match summary.updated_at_raw.as_deref() {
        None => {
            return ChangeDecision::import(ChangeReason::NoSourceTimestamp { unparseable: false })
        }
        Some(raw) => match normalize(raw) {
            Ok(instant) => instant,
            Err(e) => {
                debug!(source_id = summary.source_id, raw, error = %e, "source date unparseable");
                return ChangeDecision::import(ChangeReason::NoSourceTimestamp {
                    unparseable: true,
                });
            }
        },
    };

    let destination = match existing.updated_at.as_deref() {
        None => {
            return ChangeDecision::import(ChangeReason::NoDestinationTimestamp {
                unparseable: false,
            })
        }
        Some(raw) => match normalize(raw) {
            Ok(instant) => instant,
            Err(_) => {
                return ChangeDecision::import(ChangeReason::NoDestinationTimestamp {
                    unparseable: true,
                })
            }
        },
    };

    if source.same_instant(&destination) {
        ChangeDecision {
            needs_import: false,
            reason: ChangeReason::Unchanged,
        }
    } else {
        ChangeDecision::import(ChangeReason::TimestampDiverged)
    }
}
