use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use super::{is_remote_source, Inference, MediaInfo};
use crate::formats::{FormatRegistry, MediaKind};
use crate::identifier::Identifier;
use crate::query::QueryResult;

/// Fetched bytes together with their descriptor and origin
#[derive(Debug, Clone)]
pub struct RawMediaData {
    id: Identifier,
    url: String,
    bytes: Bytes,
    info: MediaInfo,
    result: QueryResult,
    cacheable: bool,
    converted: bool,
}

impl RawMediaData {
    /// Assemble from an already known descriptor
    pub fn new(
        id: Identifier,
        url: impl Into<String>,
        bytes: Bytes,
        info: MediaInfo,
        result: QueryResult,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            bytes,
            info,
            result,
            cacheable: true,
            converted: false,
        }
    }

    /// Assemble from bytes, inferring the descriptor on the blocking pool
    pub async fn infer(
        id: Identifier,
        url: impl Into<String>,
        bytes: Bytes,
        result: QueryResult,
        hint: Option<MediaInfo>,
        inference: &Arc<Inference>,
    ) -> Self {
        let url = url.into();
        let info = inference
            .infer_async(url.clone(), bytes.clone(), hint)
            .await;
        Self::new(id, url, bytes, info, result)
    }

    /// Error-flagged data for a source that could not be loaded
    pub fn error(id: Identifier, url: impl Into<String>, result: QueryResult) -> Self {
        let url = url.into();
        let info = MediaInfo::error(url.clone());
        Self::new(id, url, Bytes::new(), info, result)
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn query_result(&self) -> &QueryResult {
        &self.result
    }

    pub fn is_error(&self) -> bool {
        self.info.is_error
    }

    /// Media read from disk rather than downloaded
    pub fn is_local(&self) -> bool {
        self.result.is_local() || !is_remote_source(&self.url)
    }

    pub fn mark_non_cacheable(&mut self) {
        self.cacheable = false;
    }

    /// Only successfully loaded remote data that nobody excluded goes to the cache
    pub fn is_cacheable(&self) -> bool {
        self.cacheable && !self.is_error() && !self.is_local() && !self.bytes.is_empty()
    }

    pub fn kind(&self, registry: &FormatRegistry) -> MediaKind {
        registry.resolve_by_name(&self.info.format).kind()
    }

    /// Path of the source file for local media
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }

        match Url::parse(&self.url) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
            _ => Some(PathBuf::from(&self.url)),
        }
    }

    /// Swap in converted bytes and recompute the descriptor.
    ///
    /// Conversion happens at most once; later calls are ignored and return
    /// `false`.
    pub async fn replace_bytes(
        &mut self,
        bytes: Bytes,
        extension: &str,
        inference: &Arc<Inference>,
    ) -> bool {
        if self.converted {
            tracing::warn!(id = %self.id, "Media data was already converted once");
            return false;
        }

        let mut info = inference
            .infer_async(self.info.url.clone(), bytes.clone(), None)
            .await;
        info.rewrite_url(extension);

        self.bytes = bytes;
        self.info = info;
        self.converted = true;
        true
    }

    pub fn is_converted(&self) -> bool {
        self.converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NoContainerProbe;
    use crate::query::MediaRating;
    use crate::testing::png_bytes;

    fn inference() -> Arc<Inference> {
        Arc::new(Inference::new(
            Arc::new(FormatRegistry::with_defaults()),
            Arc::new(NoContainerProbe),
        ))
    }

    #[test]
    fn test_error_data_is_not_cacheable() {
        let id = Identifier::parse("example.com:a").unwrap();
        let data = RawMediaData::error(id, "https://example.com/a.png", QueryResult::Empty);
        assert!(data.is_error());
        assert!(!data.is_cacheable());
    }

    #[tokio::test]
    async fn test_local_data_is_not_cacheable() {
        let id = Identifier::parse("local:a").unwrap();
        let result = QueryResult::local("/srv/a.png", MediaRating::Safe, vec![]);
        let data =
            RawMediaData::infer(id, "/srv/a.png", png_bytes(2, 2), result, None, &inference())
                .await;

        assert!(!data.is_error());
        assert!(data.is_local());
        assert!(!data.is_cacheable());
        assert_eq!(data.local_path(), Some(PathBuf::from("/srv/a.png")));
    }

    #[tokio::test]
    async fn test_remote_data_can_be_excluded_from_cache() {
        let id = Identifier::parse("example.com:a").unwrap();
        let url = "https://example.com/a.png";
        let mut data = RawMediaData::infer(
            id,
            url,
            png_bytes(2, 2),
            QueryResult::remote(url, MediaRating::Safe, vec![]),
            None,
            &inference(),
        )
        .await;

        assert!(data.is_cacheable());
        data.mark_non_cacheable();
        assert!(!data.is_cacheable());
    }

    #[tokio::test]
    async fn test_bytes_replaced_only_once() {
        let inference = inference();
        let id = Identifier::parse("example.com:a").unwrap();
        let url = "https://example.com/a.webp";
        let mut data = RawMediaData::new(
            id,
            url,
            Bytes::from_static(b"webp"),
            MediaInfo::error(url),
            QueryResult::Empty,
        );

        assert!(data.replace_bytes(png_bytes(3, 3), "png", &inference).await);
        assert_eq!(data.info().format, "png");
        assert_eq!(data.info().url, "https://example.com/a.png");

        assert!(!data.replace_bytes(png_bytes(1, 1), "png", &inference).await);
        assert_eq!(data.info().width, Some(3));
    }
}
