//! Core data models used throughout the sync engine.
//!
//! These types represent the articles read from the help-desk source and the
//! records written to the vector store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category stored when the source article has none.
pub const DEFAULT_CATEGORY: &str = "General";

/// Status stored when the source reports neither a status nor a description.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// Derive the destination record id for a source article id.
///
/// UUIDv5 in the DNS namespace over the decimal id, so the same article
/// always lands on the same destination record, across runs and restarts.
/// This matches the `generate_uuid5(id)` helper shipped with common
/// vector-store client libraries, so records written by other tooling line up.
pub fn destination_id(source_id: i64) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, source_id.to_string().as_bytes())
}

/// One entry of a source list page.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSummary {
    pub source_id: i64,
    pub title: String,
    pub status_label: Option<String>,
    /// Last-modified date in the source's native format, if listed.
    pub updated_at_raw: Option<String>,
}

/// Full article as returned by the source detail endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceArticle {
    pub source_id: i64,
    pub title: String,
    /// Plain-text body, used both for the embedding and for storage.
    pub body_text: String,
    pub summary: String,
    pub status_label: Option<String>,
    pub slug: Option<String>,
    pub url: Option<String>,
    pub created_at_raw: Option<String>,
    pub updated_at_raw: Option<String>,
    pub category_name: Option<String>,
}

/// The detail endpoint returns a complete [`SourceArticle`].
pub type ArticleDetail = SourceArticle;

impl SourceArticle {
    /// Fill gaps in the detail from its list entry.
    ///
    /// The list and detail endpoints occasionally disagree on which fields
    /// they populate; the detail wins wherever it has a value.
    pub fn merge_summary(&mut self, summary: &ArticleSummary) {
        if self.title.trim().is_empty() {
            self.title = summary.title.clone();
        }
        if self.status_label.is_none() {
            self.status_label = summary.status_label.clone();
        }
        if self.updated_at_raw.is_none() {
            self.updated_at_raw = summary.updated_at_raw.clone();
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body_text.trim().is_empty()
    }

    pub fn category<'a>(&'a self, default: &'a str) -> &'a str {
        match self.category_name.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => default,
        }
    }

    pub fn status(&self) -> &str {
        match self.status_label.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => UNKNOWN_STATUS,
        }
    }

    /// Public URL of the article: the source's own URL when it sends one,
    /// otherwise `{base}/{source_id}/{slug}`.
    pub fn resolved_url(&self, base: &str) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim().to_string();
        }
        let slug = self.slug.as_deref().unwrap_or("").trim();
        format!("{}/{}/{}", base.trim_end_matches('/'), self.source_id, slug)
    }
}

/// An article as stored in the vector store.
///
/// `created_at` / `updated_at` hold canonical timestamps (see
/// [`crate::timestamp`]); `None` when the source date was absent or could
/// not be parsed. `vector` is `None` for metadata-only records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: Uuid,
    pub source_id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub status: String,
    pub url: String,
    pub category: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub vector: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_id_is_pinned() {
        // Values must never change: existing stores are keyed by them.
        assert_eq!(
            destination_id(42).to_string(),
            "7c411b5e-9d3f-50b5-9c28-62096e41c4ed"
        );
        assert_eq!(
            destination_id(1001).to_string(),
            "f8f51b1c-6c9d-572e-b7ed-71590274e676"
        );
    }

    #[test]
    fn destination_id_is_stable_and_distinct() {
        assert_eq!(destination_id(7), destination_id(7));
        assert_ne!(destination_id(7), destination_id(8));
        assert_eq!(destination_id(7).get_version_num(), 5);
    }

    #[test]
    fn url_falls_back_to_base_id_slug() {
        let article = SourceArticle {
            source_id: 12,
            slug: Some("reset-password".into()),
            ..Default::default()
        };
        assert_eq!(
            article.resolved_url("https://help.example.com/kb/"),
            "https://help.example.com/kb/12/reset-password"
        );

        let explicit = SourceArticle {
            url: Some("https://elsewhere/a".into()),
            ..article
        };
        assert_eq!(explicit.resolved_url("https://ignored"), "https://elsewhere/a");
    }

    #[test]
    fn category_and_status_defaults() {
        let mut article = SourceArticle::default();
        assert_eq!(article.category(DEFAULT_CATEGORY), "General");
        assert_eq!(article.status(), "Unknown");

        article.category_name = Some("  ".into());
        assert_eq!(article.category("Misc"), "Misc");

        article.category_name = Some("Billing".into());
        article.status_label = Some("Published".into());
        assert_eq!(article.category(DEFAULT_CATEGORY), "Billing");
        assert_eq!(article.status(), "Published");
    }

    #[test]
    fn merge_summary_only_fills_gaps() {
        let summary = ArticleSummary {
            source_id: 3,
            title: "From list".into(),
            status_label: Some("Draft".into()),
            updated_at_raw: Some("2024-01-01T00:00:00Z".into()),
        };
        let mut detail = SourceArticle {
            source_id: 3,
            title: "From detail".into(),
            ..Default::default()
        };
        detail.merge_summary(&summary);
        assert_eq!(detail.title, "From detail");
        assert_eq!(detail.status_label.as_deref(), Some("Draft"));
        assert_eq!(detail.updated_at_raw.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn whitespace_body_is_not_content() {
        let article = SourceArticle {
            body_text: " \n\t".into(),
            ..Default::default()
        };
        assert!(!article.has_body());
    }
}
