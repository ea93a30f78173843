//! Shared retry loop for outbound HTTP calls.
//!
//! Used by the help-desk connector, the embedding providers, and the
//! Weaviate store:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors (including per-call timeouts) → retry
//! - Anything else → returned to the caller, which decides what a 404 or
//!   400 means for its endpoint
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::Result;
use reqwest::{RequestBuilder, Response};
use std::time::Duration;
use tracing::warn;

/// Send a request, retrying transient failures up to `max_retries` times.
///
/// `make` is called once per attempt because a `RequestBuilder` is consumed
/// by `send`.
pub async fn send_with_retry<F>(label: &str, max_retries: u32, make: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tokio::time::sleep(delay).await;
        }

        match make().send().await {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    warn!(%label, %status, attempt, "transient HTTP error");
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                warn!(%label, attempt, error = %e, "HTTP request failed");
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

/// Delay before retry `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Build a client whose every call is bounded by `timeout_secs`.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(32));
        assert_eq!(backoff(12), Duration::from_secs(32));
    }
}
