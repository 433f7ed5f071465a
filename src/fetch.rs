//! Remote fetch capability.
//!
//! The pipeline only needs two things from the network: a text body for a
//! part, and binary content plus its declared content type for an image.
//! [`Fetcher`] captures exactly that, so the assembler can be driven by the
//! reqwest-backed [`HttpFetcher`] in production and by an in-memory stub in
//! tests. The core makes a single attempt per item; retries, if any, belong
//! to a `Fetcher` implementation.

use crate::config::AssemblyConfig;
use crate::error::{FetchError, FetchErrorKind, StoryError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("storybind/", env!("CARGO_PKG_VERSION"));

/// Binary content plus the content type the server declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBinary {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Something that can resolve a URL to a body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a textual body (part markup, API JSON).
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// Fetch binary content (images).
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBinary, FetchError>;
}

/// [`Fetcher`] over HTTP(S) using a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, StoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoryError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &AssemblyConfig) -> Result<Self, StoryError> {
        Self::new(Duration::from_secs(config.request_timeout_secs))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| FetchError::permanent(url, format!("invalid URL: {e}")))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError {
                url: url.to_string(),
                kind: classify_status(status.as_u16()),
                detail: format!("HTTP {status}"),
            });
        }
        debug!("GET {} → {}", url, status);
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| map_reqwest_error(url, e))
    }

    async fn fetch_binary(&self, url: &str) -> Result<FetchedBinary, FetchError> {
        let response = self.get(url).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Ok(FetchedBinary {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// 429 and 5xx are worth retrying; every other failure status is not.
pub fn classify_status(status: u16) -> FetchErrorKind {
    if status == 429 || (500..600).contains(&status) {
        FetchErrorKind::Transient
    } else {
        FetchErrorKind::Permanent
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        return FetchError {
            url: url.to_string(),
            kind: classify_status(status.as_u16()),
            detail: err.to_string(),
        };
    }
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return FetchError::transient(url, err.to_string());
    }
    FetchError::permanent(url, err.to_string())
}
