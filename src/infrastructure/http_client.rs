//! HTTP client for fetching product page snapshots
//!
//! Rate-limited, cancellable document fetches for the static extraction path
//! and for snapshot-backed page sessions.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::{InMemoryState, direct::NotKeyed}};
use reqwest::{Client, Response, header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT}};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "pt-BR,pt;q=0.9,en;q=0.8".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 2,
            follow_redirects: true,
        }
    }
}

/// Source of raw HTML documents
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch `url`, giving up as soon as `cancel` fires.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<String>;
}

/// HTTP client with rate limiting
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid accept-language")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// Fetch a URL with rate limiting and error handling
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP request failed with status {}: {}", response.status(), url);
        }

        Ok(response)
    }

    /// Fetch URL and return text content
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from: {url}"))
    }

    /// Fetch URL and return text content with cancellation support
    pub async fn get_text_with_cancellation(&self, url: &str, cancellation_token: &CancellationToken) -> Result<String> {
        if cancellation_token.is_cancelled() {
            anyhow::bail!("Request cancelled before starting");
        }

        tokio::select! {
            result = self.get_text(url) => result,
            () = cancellation_token.cancelled() => {
                tracing::warn!("🛑 HTTP request cancelled for URL: {}", url);
                anyhow::bail!("HTTP request cancelled")
            }
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl DocumentFetcher for HttpClient {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        self.get_text_with_cancellation(url, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClient::new(HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_zero_rate_limit_is_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpClient::new(config).is_err());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = client.get_text_with_cancellation("http://127.0.0.1:9/", &token).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
