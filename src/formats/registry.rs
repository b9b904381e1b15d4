use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::audio::Mp3Format;
use super::picture::{GifFormat, StaticImageFormat, WebpFormat};
use super::traits::{DecodeError, MediaFormat, MediaKind};
use super::video::{Mp4Format, WebmFormat};
use super::DecodeContext;
use crate::handler::SwapperHandler;
use crate::identifier::Identifier;
use crate::media::{source_extension, RawMediaData};

/// Stand-in for formats nobody registered; decodes to an empty handler
#[derive(Debug, Clone)]
pub struct UnimplementedFormat {
    name: String,
}

impl UnimplementedFormat {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() {
                "unknown".to_string()
            } else {
                name
            },
        }
    }
}

impl MediaFormat for UnimplementedFormat {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_extension(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Unknown
    }

    fn is_implemented(&self) -> bool {
        false
    }

    fn decode(
        &self,
        id: &Identifier,
        _data: &RawMediaData,
        _ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        tracing::debug!(id = %id, format = %self.name, "No decoder for format");
        Ok(SwapperHandler::empty(id.clone()))
    }
}

/// Registry of known formats, looked up by name, extension or container
#[derive(Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, Arc<dyn MediaFormat>>,
    extensions: BTreeMap<String, String>,
    containers: BTreeMap<String, String>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a format. Registering a name twice is a no-op; the first
    /// format to claim an extension or container name keeps it.
    pub fn register(&mut self, format: Arc<dyn MediaFormat>) -> bool {
        let name = format.name().to_ascii_lowercase();
        if self.formats.contains_key(&name) {
            tracing::debug!(format = %name, "Format already registered");
            return false;
        }

        let extensions = std::iter::once(format.primary_extension())
            .chain(format.additional_extensions().iter().copied());
        for extension in extensions {
            let extension = extension.to_ascii_lowercase();
            if let Some(owner) = self.extensions.get(&extension) {
                tracing::warn!(extension = %extension, owner = %owner, "Extension already claimed");
                continue;
            }
            self.extensions.insert(extension, name.clone());
        }

        for container in format.container_names() {
            self.containers
                .entry(container.to_ascii_lowercase())
                .or_insert_with(|| name.clone());
        }

        tracing::debug!(format = %name, kind = ?format.kind(), "Registered media format");
        self.formats.insert(name, format);
        true
    }

    /// Registry with every built-in format
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StaticImageFormat::png()));
        registry.register(Arc::new(StaticImageFormat::jpeg()));
        registry.register(Arc::new(WebpFormat));
        registry.register(Arc::new(GifFormat));
        registry.register(Arc::new(Mp4Format));
        registry.register(Arc::new(WebmFormat));
        registry.register(Arc::new(Mp3Format));
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaFormat>> {
        self.formats.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn is_registered_extension(&self, extension: &str) -> bool {
        self.extensions.contains_key(&extension.to_ascii_lowercase())
    }

    /// Registered format by name, falling back to extension lookup
    pub fn resolve_by_name(&self, name: &str) -> Arc<dyn MediaFormat> {
        self.get(name)
            .unwrap_or_else(|| self.resolve_by_extension(name))
    }

    pub fn resolve_by_extension(&self, extension: &str) -> Arc<dyn MediaFormat> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self.extensions
            .get(&extension)
            .and_then(|name| self.formats.get(name))
            .cloned()
            .unwrap_or_else(|| Arc::new(UnimplementedFormat::new(extension)))
    }

    /// First registered format among candidate container names
    pub fn resolve_by_container(&self, names: &[&str]) -> Arc<dyn MediaFormat> {
        names
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .find_map(|name| {
                self.containers
                    .get(&name)
                    .and_then(|format| self.formats.get(format))
                    .cloned()
            })
            .unwrap_or_else(|| {
                Arc::new(UnimplementedFormat::new(
                    names.first().copied().unwrap_or_default(),
                ))
            })
    }

    /// Best-effort kind of a source from its extension alone
    pub fn kind_for_source(&self, source: &str) -> MediaKind {
        source_extension(source)
            .map(|ext| self.resolve_by_extension(&ext).kind())
            .unwrap_or_default()
    }

    /// Decode with the format named in the data's descriptor.
    ///
    /// A panicking decoder is reported as [`DecodeError::Panicked`].
    pub fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let format = self.resolve_by_name(&data.info().format);
        panic::catch_unwind(AssertUnwindSafe(|| format.decode(id, data, ctx))).unwrap_or_else(
            |_| {
                tracing::error!(id = %id, format = %format.name(), "Decoder panicked");
                Err(DecodeError::Panicked(id.clone()))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_extension() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.resolve_by_extension("JPE").name(), "jpeg");
        assert_eq!(registry.resolve_by_extension(".png").name(), "png");

        let unknown = registry.resolve_by_extension("bmp");
        assert!(!unknown.is_implemented());
        assert_eq!(unknown.kind(), MediaKind::Unknown);
        assert_eq!(unknown.name(), "bmp");
    }

    #[test]
    fn test_resolve_by_container_takes_first_registered() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.resolve_by_container(&["matroska", "webm"]).name(), "webm");
        assert_eq!(
            registry
                .resolve_by_container(&["mov", "mp4", "m4a", "3gp"])
                .name(),
            "mp4"
        );
        assert_eq!(registry.resolve_by_container(&["jpg"]).name(), "jpeg");
        assert!(!registry.resolve_by_container(&["flv"]).is_implemented());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = FormatRegistry::with_defaults();
        let before: Vec<_> = registry.names().map(str::to_string).collect();

        assert!(!registry.register(Arc::new(WebpFormat)));
        let after: Vec<_> = registry.names().map(str::to_string).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_kind_for_source() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.kind_for_source("https://a.com/x.webm"), MediaKind::Video);
        assert_eq!(registry.kind_for_source("/srv/a.mp3"), MediaKind::Audio);
        assert_eq!(registry.kind_for_source("/srv/a.gif"), MediaKind::Video);
        assert_eq!(registry.kind_for_source("/srv/a"), MediaKind::Unknown);
    }
}
