//! Loading media bytes from disk, the cache or the network

pub mod http;

pub use http::{FetchError, HttpClient, HttpConfig};

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::MediaCache;
use crate::identifier::{Identifier, IdentifierError};
use crate::media::{is_remote_source, Inference, MediaInfo, RawMediaData};
use crate::observability::Metrics;
use crate::query::QueryResult;

/// Timing knobs for network fetches
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Upper bound for one download attempt
    pub timeout: Duration,
    /// Pause before the single retry of a failed (non-timeout) download
    pub retry_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Resolves a source into [`RawMediaData`], preferring the cache
pub struct Fetcher {
    http: HttpClient,
    cache: Arc<MediaCache>,
    inference: Arc<Inference>,
    metrics: Arc<Metrics>,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(
        http: HttpClient,
        cache: Arc<MediaCache>,
        inference: Arc<Inference>,
        metrics: Arc<Metrics>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            http,
            cache,
            inference,
            metrics,
            settings,
        }
    }

    /// Fetch a source, deriving its identifier from the URL
    pub async fn fetch(
        &self,
        url: &str,
        hint: Option<&MediaInfo>,
        result: QueryResult,
    ) -> std::result::Result<RawMediaData, IdentifierError> {
        let id = Identifier::derive(url)?;
        Ok(self.fetch_for(&id, url, hint, result).await)
    }

    /// Fetch a source for a known identifier.
    ///
    /// Never fails: timeouts, transport errors and empty URLs produce
    /// error-flagged data.
    pub async fn fetch_for(
        &self,
        id: &Identifier,
        url: &str,
        hint: Option<&MediaInfo>,
        result: QueryResult,
    ) -> RawMediaData {
        let url = url.trim();
        let hint = hint.cloned();

        if url.is_empty() {
            tracing::warn!(id = %id, error = %FetchError::EmptyUrl, "Cannot fetch media");
            self.metrics.fetch_failed();
            return RawMediaData::error(id.clone(), url, result);
        }

        if !is_remote_source(url) {
            return self.read_local(id, url, hint, result).await;
        }

        if let Some((bytes, key)) = self.cache.lookup(id, url).await {
            self.metrics.cache_hit();
            tracing::debug!(id = %id, key = %key.storage_path(), "Serving media from cache");
            return RawMediaData::infer(id.clone(), url, bytes, result, hint, &self.inference).await;
        }

        match self.download(url).await {
            Ok(bytes) => {
                RawMediaData::infer(id.clone(), url, bytes, result, hint, &self.inference).await
            }
            Err(e) => {
                tracing::warn!(id = %id, url, error = %e, "Failed to fetch media");
                self.metrics.fetch_failed();
                RawMediaData::error(id.clone(), url, result)
            }
        }
    }

    async fn read_local(
        &self,
        id: &Identifier,
        source: &str,
        hint: Option<MediaInfo>,
        result: QueryResult,
    ) -> RawMediaData {
        let path = match Url::parse(source) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
            _ => Some(PathBuf::from(source)),
        };

        let read = match path {
            Some(path) => tokio::fs::read(&path).await.map_err(FetchError::from),
            None => Err(FetchError::Transport(format!("not a file path: {source}"))),
        };

        match read {
            Ok(bytes) => {
                RawMediaData::infer(
                    id.clone(),
                    source,
                    Bytes::from(bytes),
                    result,
                    hint,
                    &self.inference,
                )
                .await
            }
            Err(e) => {
                tracing::warn!(id = %id, path = source, error = %e, "Failed to read local media");
                self.metrics.fetch_failed();
                RawMediaData::error(id.clone(), source, result)
            }
        }
    }

    /// Download with one retry after a short pause, unless the first attempt
    /// timed out
    async fn download(&self, url: &str) -> http::Result<Bytes> {
        match self.download_within_window(url).await {
            Err(e) if !e.is_timeout() => {
                tracing::warn!(url, error = %e, "Download failed, retrying once");
                tokio::time::sleep(self.settings.retry_delay).await;
                self.download_within_window(url).await
            }
            outcome => outcome,
        }
    }

    /// The request runs in its own task and is abandoned, not cancelled,
    /// when the window elapses
    async fn download_within_window(&self, url: &str) -> http::Result<Bytes> {
        self.metrics.network_fetch();

        let client = self.http.clone();
        let target = url.to_string();
        let request = tokio::spawn(async move { client.download(&target).await });

        match tokio::time::timeout(self.settings.timeout, request).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(FetchError::Transport(format!("download task failed: {e}"))),
            Err(_) => Err(FetchError::Timeout(self.settings.timeout)),
        }
    }
}
