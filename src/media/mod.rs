//! Media descriptors and the raw bytes they describe

pub mod probe;
pub mod raw;
pub mod transcode;

pub use probe::{ContainerInfo, ContainerProbe, FfprobeProbe, Inference, NoContainerProbe, ProbeError};
pub use raw::RawMediaData;
pub use transcode::{DisabledTranscoder, FfmpegTranscoder, TranscodeError, TranscodeRequest, Transcoder};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use url::Url;

const DURATION_TOLERANCE: f64 = 0.01;

/// Everything known about a piece of media without decoding it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Registered format name, or the raw container name when unregistered
    pub format: String,
    pub size: u64,
    pub content_hash: String,
    pub url: String,
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub is_error: bool,
}

impl MediaInfo {
    /// Descriptor for data that could not be loaded or inferred
    pub fn error(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_error: true,
            ..Self::default()
        }
    }

    pub fn has_video(&self) -> bool {
        self.video_codec.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Point the descriptor at a new extension after a format conversion
    pub fn rewrite_url(&mut self, extension: &str) {
        self.url = replace_extension(&self.url, extension);
    }
}

impl PartialEq for MediaInfo {
    fn eq(&self, other: &Self) -> bool {
        let durations_match = match (self.duration, other.duration) {
            (Some(a), Some(b)) => (a - b).abs() < DURATION_TOLERANCE,
            (None, None) => true,
            _ => false,
        };

        durations_match
            && self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.size == other.size
            && self.content_hash == other.content_hash
            && self.url == other.url
            && self.video_codec == other.video_codec
            && self.audio_codec == other.audio_codec
            && self.channels == other.channels
            && self.sample_rate == other.sample_rate
            && self.is_error == other.is_error
    }
}

/// Hex sha256 of the content
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Extension of a URL path or file path, lowercased
pub fn source_extension(source: &str) -> Option<String> {
    let path = match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => url.path().to_string(),
        _ => source.to_string(),
    };

    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether a source is fetched over the network rather than read from disk
pub fn is_remote_source(source: &str) -> bool {
    Url::parse(source).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

fn replace_extension(source: &str, extension: &str) -> String {
    match Url::parse(source) {
        Ok(mut url) if is_remote_source(source) => {
            let path = Path::new(url.path()).with_extension(extension);
            url.set_path(&path.to_string_lossy());
            url.to_string()
        }
        _ => Path::new(source)
            .with_extension(extension)
            .to_string_lossy()
            .into_owned(),
    }
}
