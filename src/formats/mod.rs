//! Media formats and handler construction
//!
//! ## Key Components
//!
//! - [`MediaFormat`] - One registered format and its decoder
//! - [`FormatRegistry`] - Lookup by name, extension or container name
//! - [`DecodeContext`] - Everything a decoder may need to finish its work
//!
//! Built-in formats: PNG, JPEG and MP3 decode synchronously; WebP, GIF and
//! WebM return a delayed handler and finish in the encoding group. MP4 plays
//! local sources directly and waits for its cache file otherwise.

mod audio;
mod picture;
mod registry;
mod traits;
mod video;

pub use audio::{decode_mp3, Mp3Format};
pub use picture::{AnimationMode, GifFormat, StaticImageFormat, WebpFormat};
pub use registry::{FormatRegistry, UnimplementedFormat};
pub use traits::{DecodeError, MediaFormat, MediaKind};
pub use video::{Mp4Format, WebmFormat};

use std::future::Future;
use std::sync::Arc;

use crate::cache::MediaCache;
use crate::concurrency::{ConcurrencyGroups, SemaphoreGroup};
use crate::handler::SwapperHandler;
use crate::identifier::Identifier;
use crate::media::{Inference, MediaInfo, RawMediaData, Transcoder};
use crate::observability::Metrics;
use crate::storage::MediaStorage;

/// Codec policy and conversion switches used by decoders
#[derive(Debug, Clone)]
pub struct DecodeSettings {
    pub allow_transcoding: bool,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub animation: AnimationMode,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            allow_transcoding: false,
            video_codecs: vec!["vp8".to_string()],
            audio_codecs: vec!["vorbis".to_string()],
            animation: AnimationMode::default(),
        }
    }
}

impl DecodeSettings {
    pub fn is_valid_video_codec(&self, codec: &str) -> bool {
        self.video_codecs.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }

    pub fn is_valid_audio_codec(&self, codec: &str) -> bool {
        self.audio_codecs.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }
}

/// Shared services handed to every decoder
#[derive(Clone)]
pub struct DecodeContext {
    pub groups: Arc<ConcurrencyGroups>,
    pub cache: Arc<MediaCache>,
    pub inference: Arc<Inference>,
    pub transcoder: Arc<dyn Transcoder>,
    pub storage: Arc<MediaStorage>,
    pub settings: Arc<DecodeSettings>,
    pub metrics: Arc<Metrics>,
}

impl DecodeContext {
    pub fn registry(&self) -> &Arc<FormatRegistry> {
        self.inference.registry()
    }

    /// Write eligible data to the cache in the background
    pub(crate) fn spawn_cache_write(&self, data: RawMediaData) {
        if !data.is_cacheable() {
            return;
        }

        let cache = self.cache.clone();
        self.groups.run(&SemaphoreGroup::default_group(), async move {
            cache.cache_if_eligible(&data).await;
        });
    }

    /// Finish a decode in the encoding group and post the outcome to the
    /// designated thread. A panic in `work` stores the error handler.
    pub(crate) fn spawn_delayed<F>(&self, id: Identifier, fallback: MediaInfo, work: F)
    where
        F: Future<Output = (MediaInfo, Option<SwapperHandler>)> + Send + 'static,
    {
        let storage = self.storage.clone();
        let runtime = self.groups.runtime().clone();

        self.groups.run(&SemaphoreGroup::encoding(), async move {
            let (info, handler) = match runtime.spawn(work).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "Delayed decode failed");
                    (fallback, None)
                }
            };

            storage.post(Box::new(move |main, storage| {
                storage.store_handler(main, &id, info, handler);
                Ok(())
            }));
        });
    }
}
