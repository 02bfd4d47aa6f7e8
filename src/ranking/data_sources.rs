//! External collaborators that supply raw signals for scoring.
//!
//! The ranking core only sees the two traits. The HTTP clients are the
//! production implementations and retry transient failures with exponential
//! backoff before giving up for the cycle.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument};

use crate::ranking::config::RankerConfig;
use crate::types::{OnChainSignals, SocialSignals};

/// Failure of a single collaborator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Network, server or decoding failure. Retried next cycle.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// The collaborator does not know the token.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::NotFound(_))
    }
}

/// On-chain analysis collaborator.
#[async_trait]
pub trait OnChainAnalyzer: Send + Sync {
    async fn analyze(&self, address: &str) -> Result<OnChainSignals, FetchError>;
}

/// Social aggregation collaborator. Tickers with no results are absent from
/// the returned map.
#[async_trait]
pub trait SocialAggregator: Send + Sync {
    async fn search_and_analyze(&self, tickers: &[String]) -> Result<HashMap<String, SocialSignals>, FetchError>;
}

fn retry_strategy(attempts: usize) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(5))
        .take(attempts)
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Transient(e.to_string())
    }
}

fn with_credentials(request: RequestBuilder, api_key: &Option<String>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

fn check_status(response: Response, subject: &str) -> Result<Response, FetchError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(FetchError::NotFound(subject.to_string())),
        status if !status.is_success() => Err(FetchError::Transient(format!(
            "{} returned HTTP {}",
            subject, status
        ))),
        _ => Ok(response),
    }
}

/// HTTP client for `GET {base}/tokens/{address}/analysis`.
pub struct HttpOnChainAnalyzer {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    retry_attempts: usize,
}

impl HttpOnChainAnalyzer {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration, retry_attempts: usize) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            retry_attempts,
        }
    }

    pub fn from_config(config: &RankerConfig) -> Self {
        Self::new(
            &config.on_chain_api_url,
            config.on_chain_api_key.clone(),
            config.on_chain_timeout(),
            config.retry_attempts,
        )
    }

    async fn fetch_analysis(&self, address: &str) -> Result<OnChainSignals, FetchError> {
        let url = format!("{}/tokens/{}/analysis", self.base_url, address);
        let request = with_credentials(self.http_client.get(&url), &self.api_key).timeout(self.timeout);

        let response = request.send().await.map_err(|e| map_send_error(e, self.timeout))?;
        let response = check_status(response, address)?;

        let signals: OnChainSignals = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to parse analysis for {}: {}", address, e)))?;

        debug!("Fetched on-chain signals for {}", address);
        Ok(signals)
    }
}

#[async_trait]
impl OnChainAnalyzer for HttpOnChainAnalyzer {
    #[instrument(skip(self))]
    async fn analyze(&self, address: &str) -> Result<OnChainSignals, FetchError> {
        RetryIf::spawn(
            retry_strategy(self.retry_attempts),
            || self.fetch_analysis(address),
            |e: &FetchError| e.is_retryable(),
        )
        .await
    }
}

#[derive(Debug, Serialize)]
struct SocialSearchRequest<'a> {
    tickers: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SocialSearchResponse {
    #[serde(default)]
    results: HashMap<String, SocialSignals>,
}

/// HTTP client for `POST {base}/social/search`.
pub struct HttpSocialAggregator {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    retry_attempts: usize,
}

impl HttpSocialAggregator {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration, retry_attempts: usize) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            retry_attempts,
        }
    }

    pub fn from_config(config: &RankerConfig) -> Self {
        Self::new(
            &config.social_api_url,
            config.social_api_key.clone(),
            config.social_timeout(),
            config.retry_attempts,
        )
    }

    async fn fetch_batch(&self, tickers: &[String]) -> Result<HashMap<String, SocialSignals>, FetchError> {
        let url = format!("{}/social/search", self.base_url);
        let request = with_credentials(self.http_client.post(&url), &self.api_key)
            .timeout(self.timeout)
            .json(&SocialSearchRequest { tickers });

        let response = request.send().await.map_err(|e| map_send_error(e, self.timeout))?;
        let response = check_status(response, "social search")?;

        let body: SocialSearchResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to parse social search response: {}", e)))?;

        debug!("Social search returned {} of {} tickers", body.results.len(), tickers.len());
        Ok(body.results)
    }
}

#[async_trait]
impl SocialAggregator for HttpSocialAggregator {
    #[instrument(skip(self), fields(batch = tickers.len()))]
    async fn search_and_analyze(&self, tickers: &[String]) -> Result<HashMap<String, SocialSignals>, FetchError> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        RetryIf::spawn(
            retry_strategy(self.retry_attempts),
            || self.fetch_batch(tickers),
            |e: &FetchError| e.is_retryable(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_retryable() {
        assert!(!FetchError::NotFound("A".to_string()).is_retryable());
        assert!(FetchError::Transient("boom".to_string()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let analyzer = HttpOnChainAnalyzer::new("http://indexer:8080/", None, Duration::from_secs(1), 0);
        assert_eq!(analyzer.base_url, "http://indexer:8080");
    }

    #[test]
    fn test_search_response_without_results() {
        let body: SocialSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(body.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_ticker_batch_skips_request() {
        let aggregator = HttpSocialAggregator::new("http://127.0.0.1:9", None, Duration::from_millis(10), 0);
        let results = aggregator.search_and_analyze(&[]).await.unwrap();
        assert!(results.is_empty());
    }
}
