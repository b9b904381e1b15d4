//! Ready-to-use media handlers
//!
//! A [`SwapperHandler`] is the decoded, playable form of one identifier. The
//! `Delayed` variant stands in while an asynchronous decode is in flight; it is
//! replaced by the final handler once that completes.

use bytes::Bytes;
use serde::Serialize;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::formats::MediaKind;
use crate::identifier::Identifier;
use crate::media::MediaInfo;

/// What a handler can be applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    Texture,
    Audio,
    Other,
}

/// Handler families a caller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    /// Surface-bound media: images, animations and video
    Mesh,
    /// Everything else, including audio
    General,
}

impl CapabilityClass {
    pub fn media_kinds(self) -> &'static [MediaKind] {
        match self {
            Self::Mesh => &[MediaKind::Image, MediaKind::Video],
            Self::General => &[MediaKind::Unknown, MediaKind::Audio],
        }
    }
}

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl Texture {
    pub fn from_image(image: image::DynamicImage) -> Self {
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            pixels: Bytes::from(rgba.into_raw()),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        image::load_from_memory(bytes).map(Self::from_image)
    }
}

/// Interleaved f32 samples
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub name: String,
    pub samples: Arc<[f32]>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub texture: Texture,
    pub delay: Duration,
}

/// Decoded animation frames
#[derive(Debug, Clone, Default)]
pub struct ImageSequence {
    pub frames: Vec<Frame>,
}

impl ImageSequence {
    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(|f| f.delay).sum()
    }
}

#[derive(Debug, Clone)]
pub enum SwapperHandler {
    Material { id: Identifier, texture: Texture },
    Video { id: Identifier, path: PathBuf, info: MediaInfo },
    Audio { id: Identifier, clip: AudioClip },
    Sequence { id: Identifier, sequence: ImageSequence },
    Delayed {
        id: Identifier,
        class: CapabilityClass,
        multiple: bool,
    },
    Empty { id: Identifier },
}

impl SwapperHandler {
    pub fn empty(id: Identifier) -> Self {
        Self::Empty { id }
    }

    pub fn id(&self) -> &Identifier {
        match self {
            Self::Material { id, .. }
            | Self::Video { id, .. }
            | Self::Audio { id, .. }
            | Self::Sequence { id, .. }
            | Self::Delayed { id, .. }
            | Self::Empty { id } => id,
        }
    }

    pub fn interactions(&self) -> &'static [Interaction] {
        match self {
            Self::Material { .. } | Self::Sequence { .. } => &[Interaction::Texture],
            Self::Video { info, .. } if info.has_audio() => &[Interaction::Texture, Interaction::Audio],
            Self::Video { .. } => &[Interaction::Texture],
            Self::Audio { .. } => &[Interaction::Audio],
            Self::Delayed { .. } | Self::Empty { .. } => &[],
        }
    }

    /// Whether the handler may be bound to several targets at once
    pub fn allow_multiple(&self) -> bool {
        match self {
            Self::Video { .. } => false,
            Self::Delayed { multiple, .. } => *multiple,
            _ => true,
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::Delayed { .. })
    }

    /// Whether a caller expecting `class` can use this handler
    pub fn supports(&self, class: CapabilityClass) -> bool {
        match self {
            Self::Material { .. } | Self::Video { .. } | Self::Sequence { .. } => {
                class == CapabilityClass::Mesh
            }
            Self::Audio { .. } => class == CapabilityClass::General,
            Self::Delayed { class: own, .. } => *own == class,
            Self::Empty { .. } => true,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Material { .. } => "material",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
            Self::Sequence { .. } => "sequence",
            Self::Delayed { .. } => "delayed",
            Self::Empty { .. } => "empty",
        }
    }
}

/// Handlers are equal when they are the same kind for the same identifier
impl PartialEq for SwapperHandler {
    fn eq(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other) && self.id() == other.id()
    }
}

impl Eq for SwapperHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    #[test]
    fn test_equality_by_kind_and_id() {
        let a = SwapperHandler::empty(id("local:a"));
        let b = SwapperHandler::empty(id("local:a"));
        let delayed = SwapperHandler::Delayed {
            id: id("local:a"),
            class: CapabilityClass::Mesh,
            multiple: true,
        };
        assert_eq!(a, b);
        assert_ne!(a, delayed);
        assert_ne!(a, SwapperHandler::empty(id("local:b")));
    }

    #[test]
    fn test_video_is_single_instance() {
        let video = SwapperHandler::Video {
            id: id("local:v"),
            path: PathBuf::from("/tmp/v.webm"),
            info: MediaInfo {
                audio_codec: Some("vorbis".to_string()),
                ..MediaInfo::default()
            },
        };
        assert!(!video.allow_multiple());
        assert!(video.supports(CapabilityClass::Mesh));
        assert!(!video.supports(CapabilityClass::General));
        assert_eq!(video.interactions(), &[Interaction::Texture, Interaction::Audio]);
    }

    #[test]
    fn test_empty_supports_every_class() {
        let empty = SwapperHandler::empty(id("local:e"));
        assert!(empty.supports(CapabilityClass::Mesh));
        assert!(empty.supports(CapabilityClass::General));
        assert!(empty.interactions().is_empty());
    }

    #[test]
    fn test_audio_clip_duration() {
        let clip = AudioClip {
            name: "beep".to_string(),
            samples: vec![0.0f32; 44100 * 2].into(),
            channels: 2,
            sample_rate: 44100,
        };
        assert_eq!(clip.frames(), 44100);
        assert_eq!(clip.duration(), Duration::from_secs(1));
    }
}
