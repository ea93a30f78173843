//! Extension trait for article sources.
//!
//! The sync engine reads articles through [`ArticleSource`]. The built-in
//! implementation is the help-desk HTTP connector
//! ([`HelpdeskConnector`](crate::connector_helpdesk::HelpdeskConnector));
//! tests and embedders can supply their own.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use anyhow::Result;
//! use kb_sync::models::{ArticleDetail, ArticleSummary};
//! use kb_sync::traits::ArticleSource;
//!
//! pub struct EmptySource;
//!
//! #[async_trait]
//! impl ArticleSource for EmptySource {
//!     fn name(&self) -> &str { "empty" }
//!
//!     async fn list_page(&self, _page: u32, _page_size: usize) -> Result<Vec<ArticleSummary>> {
//!         Ok(vec![])
//!     }
//!
//!     async fn get_detail(&self, _source_id: i64) -> Result<Option<ArticleDetail>> {
//!         Ok(None)
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ArticleDetail, ArticleSummary};

/// A paginated source of articles.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Short label used in logs (e.g. `"helpdesk"`).
    fn name(&self) -> &str;

    /// Fetch one page of article summaries.
    ///
    /// `page` is 1-based; implementations translate it to whatever their
    /// API expects. An empty page marks the end of the data.
    ///
    /// # Errors
    ///
    /// Any error here is fatal for a sync run, so implementations should
    /// retry transient failures before giving up.
    async fn list_page(&self, page: u32, page_size: usize) -> Result<Vec<ArticleSummary>>;

    /// Fetch the full article, or `None` when the source no longer has it.
    async fn get_detail(&self, source_id: i64) -> Result<Option<ArticleDetail>>;
}
