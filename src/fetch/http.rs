//! HTTP client for downloading media

use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty url")]
    EmptyUrl,

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("mediaswap/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Single-attempt HTTP downloader; the fetcher owns timeouts and retries
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    /// Download once (no retry)
    pub async fn download(&self, url: &str) -> Result<Bytes> {
        debug!(url, "Starting download");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read body: {e}")))?;

        debug!(url, size = bytes.len(), "Download completed");

        Ok(bytes)
    }
}
