//! TOML configuration.
//!
//! Secrets never live in the file: the config names the environment
//! variables that hold them (`token_env`, `api_key_env`), and the OpenAI
//! provider reads `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::DEFAULT_CATEGORY;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Paginated article list endpoint.
    pub list_url: String,
    /// Detail endpoint; the article id is appended as a path segment.
    pub detail_url: String,
    /// Environment variable holding the API token (sent as `?token=`).
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Base of public article URLs, used when the source sends none.
    #[serde(default = "default_article_base_url")]
    pub article_base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Page number the source API uses for the first page.
    #[serde(default)]
    pub page_index_base: u32,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_source_retries")]
    pub max_retries: u32,
}

fn default_token_env() -> String {
    "KB_SOURCE_TOKEN".to_string()
}
fn default_article_base_url() -> String {
    "http://localhost/article".to_string()
}
fn default_page_size() -> usize {
    30
}
fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}
fn default_source_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Provider base URL override (OpenAI-compatible gateways, Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `memory`, `sqlite`, or `weaviate`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Weaviate base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the Weaviate API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            collection: default_collection(),
            url: None,
            api_key_env: None,
            path: None,
            timeout_secs: default_timeout_secs(),
            readiness: ReadinessConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_collection() -> String {
    "Article".to_string()
}

/// Bounded polling used while a collection is being dropped or created.
#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_attempts() -> u32 {
    40
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchFailurePolicy {
    /// Log, count, and keep going with the next page.
    #[default]
    Continue,
    /// Treat a failed batch as fatal for the run.
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Maximum number of records per upsert batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub on_batch_failure: BatchFailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            on_batch_failure: BatchFailurePolicy::default(),
        }
    }
}

fn default_batch_size() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate source
    if config.source.page_size == 0 {
        anyhow::bail!("source.page_size must be > 0");
    }

    // Validate sync
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate store
    match config.store.backend.as_str() {
        "memory" => {}
        "sqlite" => {
            if config.store.path.is_none() {
                anyhow::bail!("store.path is required for the sqlite backend");
            }
        }
        "weaviate" => {
            if config.store.url.is_none() {
                anyhow::bail!("store.url is required for the weaviate backend");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be memory, sqlite, or weaviate.",
            other
        ),
    }

    if config.store.readiness.max_attempts == 0 {
        anyhow::bail!("store.readiness.max_attempts must be >= 1");
    }

    Ok(config)
}
