//! Help-desk knowledge-base connector.
//!
//! Reads articles from a help-desk REST API that exposes a paginated list
//! endpoint and a per-article detail endpoint, both authenticated with a
//! `token` query parameter.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! list_url = "https://api.helpdesk.example/public/v1/article"
//! detail_url = "https://api.helpdesk.example/public/v1/article"
//! token_env = "KB_SOURCE_TOKEN"
//! article_base_url = "https://help.example.com/kb/article"
//! page_size = 30
//! page_index_base = 0      # the API counts pages from zero
//! ```
//!
//! # Wire format
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | list | `GET {list_url}?token=…&page=N&pageSize=M` | array of articles, or `{ "items": [...] }` |
//! | detail | `GET {detail_url}/{id}?token=…` | article object; `404` when gone |
//!
//! Article objects use camelCase keys: `id`, `title`, `contentText`,
//! `shortContent`, `articleStatus`, `statusDescription`, `slug`, `url`,
//! `createdDate`, `updatedDate`, and `category` (string or `{ "name": … }`).
//! Ids and statuses may arrive as numbers or strings.
//!
//! Transient failures (429, 5xx, network, timeout) are retried with
//! exponential backoff; see [`crate::http`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::http;
use crate::models::{ArticleDetail, ArticleSummary};
use crate::traits::ArticleSource;

/// HTTP implementation of [`ArticleSource`].
pub struct HelpdeskConnector {
    list_url: String,
    detail_url: String,
    token: Option<String>,
    page_index_base: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl HelpdeskConnector {
    /// Create a connector, reading the API token from `config.token_env`.
    ///
    /// A missing token is not an error (some deployments proxy the API),
    /// but it is logged.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            warn!(
                env = %config.token_env,
                "source token not set; calling the help-desk API unauthenticated"
            );
        }
        Self::with_token(config, token)
    }

    pub fn with_token(config: &SourceConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            list_url: config.list_url.clone(),
            detail_url: config.detail_url.trim_end_matches('/').to_string(),
            token,
            page_index_base: config.page_index_base,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.query(&[("token", token.as_str())]),
            None => request,
        }
    }
}

#[async_trait]
impl ArticleSource for HelpdeskConnector {
    fn name(&self) -> &str {
        "helpdesk"
    }

    async fn list_page(&self, page: u32, page_size: usize) -> Result<Vec<ArticleSummary>> {
        let wire_page = page.saturating_sub(1) + self.page_index_base;
        debug!(page, wire_page, page_size, "listing articles");

        let response = http::send_with_retry("help-desk list", self.max_retries, || {
            self.with_auth(self.client.get(&self.list_url)).query(&[
                ("page", wire_page.to_string()),
                ("pageSize", page_size.to_string()),
            ])
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("help-desk list error {} (page {}): {}", status, page, body_text);
        }

        let json: Value = response.json().await?;
        parse_list(&json)
    }

    async fn get_detail(&self, source_id: i64) -> Result<Option<ArticleDetail>> {
        let url = format!("{}/{}", self.detail_url, source_id);

        let response = http::send_with_retry("help-desk detail", self.max_retries, || {
            self.with_auth(self.client.get(&url))
        })
        .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!(
                "help-desk detail error {} (article {}): {}",
                status,
                source_id,
                body_text
            );
        }

        let json: Value = response.json().await?;
        parse_detail(&json, source_id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_text: Option<String>,
    #[serde(default)]
    short_content: Option<String>,
    #[serde(default)]
    article_status: Option<Value>,
    #[serde(default)]
    status_description: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_date: Option<String>,
    #[serde(default)]
    updated_date: Option<String>,
    #[serde(default)]
    category: Option<Value>,
}

impl RawArticle {
    fn source_id(&self) -> Option<i64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn status_label(&self) -> Option<String> {
        self.article_status
            .as_ref()
            .and_then(scalar_to_string)
            .or_else(|| non_empty(self.status_description.clone()))
    }

    fn category_name(&self) -> Option<String> {
        match self.category.as_ref()? {
            Value::Object(map) => map.get("name").and_then(scalar_to_string),
            other => scalar_to_string(other),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a list response: a bare array or an object wrapping `items`.
fn parse_list(json: &Value) -> Result<Vec<ArticleSummary>> {
    let items = match json {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items,
            _ => bail!("Invalid help-desk list response: object without an items array"),
        },
        other => bail!("Invalid help-desk list response: {}", type_name(other)),
    };

    let mut summaries = Vec::with_capacity(items.len());
    for item in items {
        let raw: RawArticle = match serde_json::from_value(item.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "skipping malformed list item");
                continue;
            }
        };
        let Some(source_id) = raw.source_id() else {
            warn!(title = ?raw.title, "skipping list item without an id");
            continue;
        };
        summaries.push(ArticleSummary {
            source_id,
            title: raw.title.clone().unwrap_or_default(),
            status_label: raw.status_label(),
            updated_at_raw: non_empty(raw.updated_date.clone()),
        });
    }

    Ok(summaries)
}

fn parse_detail(json: &Value, requested_id: i64) -> Result<Option<ArticleDetail>> {
    if !json.is_object() {
        bail!(
            "Invalid help-desk detail response for article {}: {}",
            requested_id,
            type_name(json)
        );
    }
    let raw: RawArticle = serde_json::from_value(json.clone())?;

    Ok(Some(ArticleDetail {
        source_id: raw.source_id().unwrap_or(requested_id),
        title: raw.title.clone().unwrap_or_default(),
        body_text: raw.content_text.clone().unwrap_or_default(),
        summary: raw.short_content.clone().unwrap_or_default(),
        status_label: raw.status_label(),
        slug: non_empty(raw.slug.clone()),
        url: non_empty(raw.url.clone()),
        created_at_raw: non_empty(raw.created_date.clone()),
        updated_at_raw: non_empty(raw.updated_date.clone()),
        category_name: raw.category_name(),
    }))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
