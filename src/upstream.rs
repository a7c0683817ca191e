use crate::constants::{RETRYABLE_STATUS_CODES, UPSTREAM_API_KEY_HEADER, UPSTREAM_ASK_PATH};
use crate::ingress::UpstreamAskBody;
use crate::types::{RelayError, Result};
use std::time::Duration;

/// Client for the analysis backend. Only the initial POST is retried;
/// once a stream is open the terminal event settles the outcome.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String, max_retries: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        }
    }

    /// Opens the streaming analysis request. A non-success upstream status
    /// is surfaced with its status and body text so the caller can report
    /// it before any stream opens.
    pub async fn ask(&self, body: &UpstreamAskBody) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, UPSTREAM_ASK_PATH);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.ask_once(&url, body).await {
                Ok(response) => return Ok(response),
                Err(e) if attempts <= self.max_retries && is_retryable(&e.inner) => {
                    let delay = backoff_with_jitter(attempts);
                    tracing::warn!(
                        "[relay -> backend] Attempt {} failed: {}. Retrying in {:?}...",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ask_once(&self, url: &str, body: &UpstreamAskBody) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header(UPSTREAM_API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(RelayError::Network)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let error_body = match response.text().await {
                Ok(text) => text,
                Err(_) => "Unknown error (failed to read response text)".to_string(),
            };
            Err(RelayError::Upstream(status, error_body).into())
        }
    }
}

fn is_retryable(err: &RelayError) -> bool {
    match err {
        RelayError::Network(_) => true,
        RelayError::Upstream(status, _) => RETRYABLE_STATUS_CODES.contains(&status.as_u16()),
        _ => false,
    }
}

/// Exponential backoff with ±25% jitter, base 100ms.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 100u64 * 2u64.pow(attempt.saturating_sub(1).min(6));
    let jitter_range = (base_ms / 4) as i64;
    let jitter = if jitter_range > 0 {
        fastrand::i64(-jitter_range..jitter_range)
    } else {
        0
    };
    Duration::from_millis((base_ms as i64 + jitter).max(1) as u64)
}
