use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DecodeContext;
use crate::cache::CacheError;
use crate::handler::SwapperHandler;
use crate::identifier::Identifier;
use crate::media::{RawMediaData, TranscodeError};

/// Broad family of a format, used for cache layout and selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    #[default]
    Unknown,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Unknown,
    ];

    /// Cache sub-directory for this kind
    pub fn directory(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Audio => "audio",
            Self::Unknown => "misc",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("audio decode failed: {0}")]
    Audio(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("no playable file for {0}")]
    NoPlayablePath(Identifier),
    #[error("decoder panicked for {0}")]
    Panicked(Identifier),
}

/// A registered media format and how to turn its bytes into a handler.
///
/// `decode` runs on the designated thread. Formats that need slow work
/// (conversion, transcoding) schedule it through the context and return a
/// `Delayed` handler; the final handler is stored when the work completes.
pub trait MediaFormat: Send + Sync {
    fn name(&self) -> &str;

    fn primary_extension(&self) -> &str;

    fn additional_extensions(&self) -> &[&'static str] {
        &[]
    }

    fn kind(&self) -> MediaKind;

    /// Container names a probe may report for this format
    fn container_names(&self) -> &[&'static str] {
        &[]
    }

    fn is_implemented(&self) -> bool {
        true
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError>;
}
