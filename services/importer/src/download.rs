//! Retrieval engine: HTTP GET with bounded retry and exponential backoff.
//!
//! Only transient failures are retried: statuses on the configured
//! allow-list (500/502/503/504 by default) and network-layer errors such as
//! refused connections or timeouts. Anything else fails on the first
//! attempt. 200 and 206 are the only accepted final statuses.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::ecmwf::EcmwfClient;
use crate::error::{ImportError, ImportResult};
use crate::planner::FetchSpec;

/// Retry behaviour of the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry.
    pub initial_backoff_ms: u64,
    /// Whole-request timeout.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Tighter per-request timeout for small index documents.
    pub index_timeout_secs: u64,
    /// Statuses treated as transient.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            timeout_secs: 120,
            connect_timeout_secs: 5,
            index_timeout_secs: 30,
            retry_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt + 1` (`attempt` counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    fn is_transient_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }
}

fn is_transient_error(error: &reqwest::Error) -> bool {
    !error.is_builder() && (error.is_connect() || error.is_timeout() || error.is_body())
}

/// HTTP client with retry.
#[derive(Debug, Clone)]
pub struct Retriever {
    client: Client,
    config: RetryConfig,
}

impl Retriever {
    pub fn new(config: RetryConfig) -> ImportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ImportError::retrieval("client", e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// GET `url`, returning the body of a 200 or 206 response.
    ///
    /// `timeout` overrides the client-wide timeout for each attempt.
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> ImportResult<Bytes> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self.attempt(url, headers, timeout).await;

            let (transient, message) = match outcome {
                Ok(body) => {
                    metrics::counter!("importer_http_requests_total", "outcome" => "ok")
                        .increment(1);
                    return Ok(body);
                }
                Err(AttemptError::Status(status)) => {
                    (self.config.is_transient_status(status), format!("HTTP status {}", status))
                }
                Err(AttemptError::Transport(e)) => (is_transient_error(&e), e.to_string()),
            };

            if !transient || attempt >= max_attempts {
                metrics::counter!("importer_http_requests_total", "outcome" => "failed")
                    .increment(1);
                return Err(ImportError::retrieval(
                    url,
                    format!("{} after {} attempt(s)", message, attempt),
                ));
            }

            let delay = self.config.backoff(attempt);
            warn!(
                error = %message,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Transient retrieval failure, retrying"
            );
            metrics::counter!("importer_http_retries_total").increment(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// GET `url` and write the body to `dest`, returning the byte count.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> ImportResult<u64> {
        let body = self.fetch(url, &HeaderMap::new(), None).await?;
        fs::write(dest, &body).await?;
        debug!(path = %dest.display(), bytes = body.len(), "Saved download");
        Ok(body.len() as u64)
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Bytes, AttemptError> {
        let mut request = self.client.get(url).headers(headers.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                response.bytes().await.map_err(AttemptError::Transport)
            }
            status => Err(AttemptError::Status(status)),
        }
    }
}

enum AttemptError {
    Status(StatusCode),
    Transport(reqwest::Error),
}

/// Downloads one planned fetch target to a local file.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> ImportResult<()>;
}

/// Fetches GFS URLs directly and ECMWF requests through the open-data client.
pub struct ProviderFetcher {
    retriever: Arc<Retriever>,
    ecmwf: EcmwfClient,
}

impl ProviderFetcher {
    pub fn new(retriever: Arc<Retriever>, ecmwf: EcmwfClient) -> Self {
        Self { retriever, ecmwf }
    }
}

#[async_trait]
impl Fetch for ProviderFetcher {
    async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> ImportResult<()> {
        match spec {
            FetchSpec::Http { url } => {
                self.retriever.fetch_to_file(url, dest).await?;
            }
            FetchSpec::Ecmwf(request) => {
                let body = self.ecmwf.retrieve(&self.retriever, request).await?;
                fs::write(dest, &body).await?;
            }
        }
        Ok(())
    }
}
