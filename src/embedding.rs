//! Embedding providers.
//!
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! With `provider = "disabled"` there is no provider at all and articles are
//! stored metadata-only.
//!
//! The sync pipeline never calls a provider directly. It goes through
//! [`embed`], which trims the input, refuses empty text without a network
//! call, checks the vector length, and folds every provider error into an
//! [`EmbeddingFailure`].
//!
//! [`vec_to_blob`] and [`blob_to_vec`] are the vector encoding of the SQLite
//! store.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::http;

/// Why an article produced no vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingFailure {
    /// The text was empty or whitespace; the provider was not called.
    #[error("empty input")]
    EmptyInput,
    /// The provider call failed or returned an unusable vector.
    #[error("provider error: {0}")]
    ProviderError(String),
}

impl EmbeddingFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            EmbeddingFailure::EmptyInput => "empty_input",
            EmbeddingFailure::ProviderError(_) => "provider_error",
        }
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one text. One external call per invocation.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embed an article body, reporting failures as values.
///
/// # Errors
///
/// - [`EmbeddingFailure::EmptyInput`] for empty or whitespace-only text.
/// - [`EmbeddingFailure::ProviderError`] for network/provider errors, an
///   empty vector, or a vector whose length differs from
///   [`EmbeddingProvider::dims`].
pub async fn embed(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EmbeddingFailure::EmptyInput);
    }

    let vector = provider
        .embed_text(text)
        .await
        .map_err(|e| EmbeddingFailure::ProviderError(format!("{:#}", e)))?;

    if vector.is_empty() {
        return Err(EmbeddingFailure::ProviderError(
            "provider returned an empty vector".to_string(),
        ));
    }
    let dims = provider.dims();
    if dims != 0 && vector.len() != dims {
        return Err(EmbeddingFailure::ProviderError(format!(
            "expected {} dimensions, got {}",
            dims,
            vector.len()
        )));
    }

    Ok(vector)
}

// ============ OpenAI Provider ============

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings` with the configured model. The key
/// comes from `OPENAI_API_KEY` unless supplied via [`OpenAIProvider::with_api_key`].
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        // Newlines are folded to spaces before sending.
        let body = serde_json::json!({
            "model": self.model,
            "input": text.replace('\n', " "),
        });
        let endpoint = format!("{}/v1/embeddings", self.url);

        let response = http::send_with_retry("OpenAI API", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;

    Ok(to_f32_vec(embedding))
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let endpoint = format!("{}/api/embed", self.url);

        let response = http::send_with_retry("Ollama API", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .map_err(|e| {
            anyhow::anyhow!("Ollama unavailable (is Ollama running at {}?): {}", self.url, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings[0]"))?;

    Ok(to_f32_vec(embedding))
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Build the configured provider; `disabled` yields `None`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIProvider::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Little-endian `f32` bytes, four per element.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`vec_to_blob`]. Trailing bytes short of a full `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        result: Result<Vec<f32>, String>,
        dims: usize,
    }

    impl CountingProvider {
        fn returning(result: Result<Vec<f32>, String>, dims: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result,
                dims,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[tokio::test]
    async fn empty_input_skips_the_provider() {
        let provider = CountingProvider::returning(Ok(vec![1.0, 2.0]), 2);
        assert_eq!(embed(&provider, "").await, Err(EmbeddingFailure::EmptyInput));
        assert_eq!(embed(&provider, "  \n\t ").await, Err(EmbeddingFailure::EmptyInput));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_errors_become_failures() {
        let provider = CountingProvider::returning(Err("connection reset".into()), 2);
        let err = embed(&provider, "hello").await.unwrap_err();
        assert_eq!(err.reason(), "provider_error");
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_failure() {
        let provider = CountingProvider::returning(Ok(vec![1.0, 2.0, 3.0]), 2);
        let err = embed(&provider, "hello").await.unwrap_err();
        assert!(err.to_string().contains("expected 2 dimensions, got 3"));
    }

    #[tokio::test]
    async fn successful_embedding_passes_through() {
        let provider = CountingProvider::returning(Ok(vec![0.5, -0.5]), 2);
        assert_eq!(embed(&provider, "  hello  ").await, Ok(vec![0.5, -0.5]));
    }

    #[test]
    fn disabled_config_has_no_provider() {
        let config = EmbeddingConfig::default();
        assert!(create_provider(&config).unwrap().is_none());
    }

    #[test]
    fn parse_openai_first_embedding() {
        let json = serde_json::json!({
            "data": [{ "index": 0, "embedding": [0.25, -1.0] }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.25, -1.0]);
        assert!(parse_openai_response(&serde_json::json!({ "data": [] })).is_err());
    }

    #[test]
    fn parse_ollama_first_embedding() {
        let json = serde_json::json!({ "embeddings": [[1.5, 2.5]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![1.5, 2.5]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }
}
