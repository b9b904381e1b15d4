//! Content cache for downloaded media
//!
//! Backed by object_store: a local directory in production, in-memory for
//! tests. Entries live at `<kind>/<namespace>/<path>.<extension>` and are
//! never overwritten once written.

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as StoragePath, ObjectMeta, ObjectStore};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::formats::{FormatRegistry, MediaKind};
use crate::identifier::Identifier;
use crate::media::{source_extension, Inference, RawMediaData};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Location of one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: MediaKind,
    pub namespace: String,
    pub stem: String,
    pub extension: String,
}

impl CacheKey {
    pub fn new(kind: MediaKind, id: &Identifier, extension: &str) -> Self {
        Self {
            kind,
            namespace: id.namespace().to_string(),
            stem: id.path().to_string(),
            extension: extension.to_ascii_lowercase(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }

    pub fn storage_path(&self) -> StoragePath {
        StoragePath::from(format!(
            "{}/{}/{}",
            self.kind.directory(),
            self.namespace,
            self.file_name()
        ))
    }

    fn directory(kind: MediaKind, id: &Identifier) -> StoragePath {
        StoragePath::from(format!("{}/{}", kind.directory(), id.namespace()))
    }
}

/// Disk (or memory) cache keyed by identifier
pub struct MediaCache {
    store: Arc<dyn ObjectStore>,
    root: Option<PathBuf>,
    registry: Arc<FormatRegistry>,
}

impl MediaCache {
    /// Cache rooted at a local directory, created if missing
    pub fn local(root: impl Into<PathBuf>, registry: Arc<FormatRegistry>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;

        tracing::debug!(root = %root.display(), "Opened media cache");

        Ok(Self {
            store: Arc::new(store),
            root: Some(root),
            registry,
        })
    }

    /// In-memory cache for tests; entries have no file path
    pub fn in_memory(registry: Arc<FormatRegistry>) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            root: None,
            registry,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Key for `id` stored in the given format
    pub fn key_for(&self, id: &Identifier, format_name: &str) -> CacheKey {
        let format = self.registry.resolve_by_name(format_name);
        CacheKey::new(format.kind(), id, format.primary_extension())
    }

    pub fn file_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.root.as_ref().map(|root| {
            root.join(key.kind.directory())
                .join(&key.namespace)
                .join(key.file_name())
        })
    }

    /// Cache file the data would be (or was) written to
    pub fn file_path_for(&self, data: &RawMediaData) -> Option<PathBuf> {
        self.file_path(&self.key_for(data.id(), &data.info().format))
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        match self.store.head(&key.storage_path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        match self.store.get(&key.storage_path()).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write unless an entry already exists. Returns whether the entry is
    /// present afterwards.
    pub async fn write_if_absent(&self, key: &CacheKey, bytes: Bytes) -> Result<bool> {
        if self.exists(key).await? {
            return Ok(true);
        }

        let size = bytes.len();
        self.store.put(&key.storage_path(), bytes.into()).await?;
        tracing::info!(key = %key.storage_path(), size, "Cached media");
        Ok(true)
    }

    /// Find cached bytes for a source.
    ///
    /// The primary lookup uses the format implied by the source extension.
    /// Otherwise any `<path>.*` entry for the identifier is accepted, since
    /// conversions may have stored it under another format.
    pub async fn lookup(&self, id: &Identifier, source: &str) -> Option<(Bytes, CacheKey)> {
        let format = source_extension(source)
            .map(|ext| self.registry.resolve_by_extension(&ext))
            .filter(|format| format.is_implemented());

        let mut kinds = MediaKind::ALL.to_vec();
        if let Some(format) = format {
            let key = CacheKey::new(format.kind(), id, format.primary_extension());
            match self.read(&key).await {
                Ok(Some(bytes)) => return Some((bytes, key)),
                Ok(None) => {}
                Err(e) => tracing::debug!(id = %id, error = %e, "Primary cache lookup failed"),
            }
            kinds.retain(|kind| *kind != format.kind());
            kinds.insert(0, format.kind());
        }

        for kind in kinds {
            match self.find_any_extension(kind, id).await {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(e) => tracing::debug!(id = %id, error = %e, "Secondary cache lookup failed"),
            }
        }

        None
    }

    async fn find_any_extension(
        &self,
        kind: MediaKind,
        id: &Identifier,
    ) -> Result<Option<(Bytes, CacheKey)>> {
        let listing = self
            .store
            .list_with_delimiter(Some(&CacheKey::directory(kind, id)))
            .await?;

        let mut candidates: Vec<CacheKey> = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename())
            .filter_map(|name| name.rsplit_once('.'))
            .filter(|(stem, _)| *stem == id.path())
            .map(|(_, extension)| CacheKey::new(kind, id, extension))
            .collect();
        candidates.sort_by(|a, b| a.extension.cmp(&b.extension));

        for key in candidates {
            if let Some(bytes) = self.read(&key).await? {
                return Ok(Some((bytes, key)));
            }
        }

        Ok(None)
    }

    /// Write data to the cache when it is eligible. Existing entries are
    /// kept as they are; returns whether an entry is present.
    pub async fn cache_if_eligible(&self, data: &RawMediaData) -> bool {
        if !data.is_cacheable() {
            return false;
        }

        let key = self.key_for(data.id(), &data.info().format);
        match self.write_if_absent(&key, data.bytes().clone()).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(id = %data.id(), error = %e, "Failed to cache media");
                false
            }
        }
    }

    /// Convert eligible data before caching it.
    ///
    /// When an entry for the current format already exists nothing is
    /// converted. Otherwise the converter output replaces the data's bytes
    /// (and descriptor) and the converted form is cached.
    pub async fn convert_and_cache<F, Fut>(
        &self,
        data: &mut RawMediaData,
        extension: &str,
        inference: &Arc<Inference>,
        converter: F,
    ) -> bool
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = Option<Bytes>>,
    {
        if !data.is_cacheable() {
            return false;
        }

        let key = self.key_for(data.id(), &data.info().format);
        if self.exists(&key).await.unwrap_or(false) {
            return true;
        }

        let Some(converted) = converter(data.bytes().clone()).await else {
            return false;
        };

        if !data.replace_bytes(converted, extension, inference).await {
            return false;
        }

        self.cache_if_eligible(data).await
    }

    async fn list_all(&self) -> Result<Vec<ObjectMeta>> {
        let mut pending: Vec<Option<StoragePath>> = vec![None];
        let mut objects = Vec::new();

        while let Some(prefix) = pending.pop() {
            let listing = self.store.list_with_delimiter(prefix.as_ref()).await?;
            objects.extend(listing.objects);
            pending.extend(listing.common_prefixes.into_iter().map(Some));
        }

        Ok(objects)
    }

    /// Delete entries last modified more than `max_age` ago
    pub async fn prune_older_than(&self, max_age: ChronoDuration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for meta in self.list_all().await? {
            if meta.last_modified < cutoff {
                self.store.delete(&meta.location).await?;
                removed += 1;
            }
        }

        tracing::info!(removed, "Pruned media cache");
        Ok(removed)
    }

    pub async fn entry_count(&self) -> Result<usize> {
        Ok(self.list_all().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaInfo, NoContainerProbe};
    use crate::query::{MediaRating, QueryResult};
    use crate::testing::png_bytes;
    use tempfile::TempDir;

    fn registry() -> Arc<FormatRegistry> {
        Arc::new(FormatRegistry::with_defaults())
    }

    fn inference() -> Arc<Inference> {
        Arc::new(Inference::new(registry(), Arc::new(NoContainerProbe)))
    }

    async fn remote_png(url: &str) -> RawMediaData {
        let id = Identifier::derive(url).unwrap();
        RawMediaData::infer(
            id,
            url,
            png_bytes(2, 2),
            QueryResult::remote(url, MediaRating::Safe, vec![]),
            None,
            &inference(),
        )
        .await
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::local(dir.path(), registry()).unwrap();
        let data = remote_png("https://example.com/cat.png").await;

        assert!(cache.cache_if_eligible(&data).await);

        let (bytes, key) = cache.lookup(data.id(), data.url()).await.unwrap();
        assert_eq!(bytes, *data.bytes());
        assert_eq!(key.storage_path().as_ref(), "images/example.com/cat.png");

        let path = cache.file_path(&key).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), data.bytes().to_vec());
    }

    #[tokio::test]
    async fn test_never_overwrites_existing_entry() {
        let cache = MediaCache::in_memory(registry());
        let data = remote_png("https://example.com/cat.png").await;
        let key = cache.key_for(data.id(), "png");

        cache
            .write_if_absent(&key, Bytes::from_static(b"first"))
            .await
            .unwrap();
        assert!(cache.cache_if_eligible(&data).await);

        assert_eq!(cache.read(&key).await.unwrap().unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_secondary_lookup_finds_other_extension() {
        let cache = MediaCache::in_memory(registry());
        let id = Identifier::parse("example.com:pic").unwrap();
        let png_key = CacheKey::new(MediaKind::Image, &id, "png");
        cache
            .write_if_absent(&png_key, png_bytes(1, 1))
            .await
            .unwrap();

        let (_, key) = cache
            .lookup(&id, "https://example.com/pic.webp")
            .await
            .unwrap();
        assert_eq!(key, png_key);

        assert!(cache.lookup(&id, "https://example.com/pic.gif").await.is_some());
        let other = Identifier::parse("example.com:other").unwrap();
        assert!(cache.lookup(&other, "https://example.com/other.png").await.is_none());
    }

    #[tokio::test]
    async fn test_ineligible_data_is_not_cached() {
        let cache = MediaCache::in_memory(registry());

        let error = RawMediaData::error(
            Identifier::parse("example.com:gone").unwrap(),
            "https://example.com/gone.png",
            QueryResult::Empty,
        );
        assert!(!cache.cache_if_eligible(&error).await);

        let mut censored = remote_png("https://example.com/nsfw.png").await;
        censored.mark_non_cacheable();
        assert!(!cache.cache_if_eligible(&censored).await);

        let local = RawMediaData::new(
            Identifier::parse("local:a").unwrap(),
            "/srv/a.png",
            png_bytes(1, 1),
            MediaInfo {
                format: "png".to_string(),
                ..MediaInfo::default()
            },
            QueryResult::local("/srv/a.png", MediaRating::Safe, vec![]),
        );
        assert!(!cache.cache_if_eligible(&local).await);

        assert_eq!(cache.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_convert_and_cache_stores_converted_form() {
        let cache = MediaCache::in_memory(registry());
        let url = "https://example.com/anim.webp";
        let mut data = RawMediaData::new(
            Identifier::derive(url).unwrap(),
            url,
            Bytes::from_static(b"original"),
            MediaInfo {
                format: "webp".to_string(),
                url: url.to_string(),
                ..MediaInfo::default()
            },
            QueryResult::remote(url, MediaRating::Safe, vec![]),
        );

        let cached = cache
            .convert_and_cache(&mut data, "png", &inference(), |_| async {
                Some(png_bytes(2, 2))
            })
            .await;

        assert!(cached);
        assert_eq!(data.info().format, "png");
        let key = cache.key_for(data.id(), "png");
        assert!(cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_entries() {
        let cache = MediaCache::in_memory(registry());
        let data = remote_png("https://example.com/cat.png").await;
        cache.cache_if_eligible(&data).await;

        assert_eq!(cache.prune_older_than(ChronoDuration::days(2)).await.unwrap(), 0);
        assert_eq!(cache.entry_count().await.unwrap(), 1);

        assert_eq!(cache.prune_older_than(ChronoDuration::seconds(-1)).await.unwrap(), 1);
        assert_eq!(cache.entry_count().await.unwrap(), 0);
    }
}
