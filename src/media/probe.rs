//! Descriptor inference
//!
//! Inference tries three probes in order: an image decoder, an audio decoder
//! (MP3 only), then an external container probe for video. The first probe
//! that recognizes the bytes decides the format.

use bytes::Bytes;
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use symphonia::core::codecs::CODEC_TYPE_MP3;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::{content_hash, source_extension, MediaInfo};
use crate::formats::FormatRegistry;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no probe recognized the data")]
    InferenceFailure,
    #[error("image probe failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("audio probe failed: {0}")]
    Audio(String),
    #[error("container probe unavailable: {0}")]
    Unavailable(String),
    #[error("container probe failed: {0}")]
    Container(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}", join_failures(.0))]
    All(Vec<ProbeError>),
}

fn join_failures(failures: &[ProbeError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Streams and container names reported by a container probe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    /// Candidate container names, most specific first
    pub format_names: Vec<String>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
}

/// Inspects container formats the in-process decoders do not understand
pub trait ContainerProbe: Send + Sync {
    fn probe(&self, bytes: &Bytes) -> Result<ContainerInfo, ProbeError>;
}

/// Probe that recognizes nothing; used when no external prober is configured
#[derive(Debug, Default, Clone)]
pub struct NoContainerProbe;

impl ContainerProbe for NoContainerProbe {
    fn probe(&self, _bytes: &Bytes) -> Result<ContainerInfo, ProbeError> {
        Err(ProbeError::Unavailable("no container probe configured".to_string()))
    }
}

/// Container probe backed by the `ffprobe` executable
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u16>,
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
}

impl ContainerProbe for FfprobeProbe {
    fn probe(&self, bytes: &Bytes) -> Result<ContainerInfo, ProbeError> {
        let mut child = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-i",
                "pipe:0",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProbeError::Unavailable(format!("{}: {e}", self.binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProbeError::Container("ffprobe stdin unavailable".to_string()))?;
        let input = bytes.clone();
        // ffprobe may stop reading early; a broken pipe here is expected
        let writer = std::thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });

        let output = child.wait_with_output()?;
        let _ = writer.join();

        if !output.status.success() {
            return Err(ProbeError::Container(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        parse_ffprobe_output(&output.stdout)
    }
}

fn parse_ffprobe_output(stdout: &[u8]) -> Result<ContainerInfo, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::Container(format!("unreadable ffprobe output: {e}")))?;

    let format = parsed
        .format
        .ok_or_else(|| ProbeError::Container("no format section".to_string()))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if video.is_none() && audio.is_none() {
        return Err(ProbeError::Container("no audio or video streams".to_string()));
    }

    Ok(ContainerInfo {
        format_names: format
            .format_name
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        duration: format.duration.and_then(|d| d.parse().ok()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        channels: audio.and_then(|s| s.channels),
        sample_rate: audio
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|rate| rate.parse().ok()),
    })
}

struct ImageProbe {
    width: u32,
    height: u32,
    container: &'static str,
}

fn probe_image(bytes: &Bytes) -> Result<ImageProbe, ProbeError> {
    let reader = image::ImageReader::new(Cursor::new(bytes.as_ref())).with_guessed_format()?;
    let format = reader.format().ok_or(ProbeError::InferenceFailure)?;
    let container = format.extensions_str().first().copied().unwrap_or("image");
    let (width, height) = reader.into_dimensions()?;

    Ok(ImageProbe {
        width,
        height,
        container,
    })
}

struct AudioProbe {
    duration: Option<f64>,
    channels: Option<u16>,
    sample_rate: Option<u32>,
}

fn probe_mp3(bytes: &Bytes, extension: Option<&str>) -> Result<AudioProbe, ProbeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.clone())), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ProbeError::Audio(e.to_string()))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| ProbeError::Audio("no default track".to_string()))?;
    let params = &track.codec_params;

    if params.codec != CODEC_TYPE_MP3 {
        return Err(ProbeError::Audio("not an mp3 stream".to_string()));
    }

    let duration = match (params.time_base, params.n_frames) {
        (Some(time_base), Some(frames)) => {
            let time = time_base.calc_time(frames);
            Some(time.seconds as f64 + time.frac)
        }
        _ => None,
    };

    Ok(AudioProbe {
        duration,
        channels: params.channels.map(|c| c.count() as u16),
        sample_rate: params.sample_rate,
    })
}

/// Builds [`MediaInfo`] from raw bytes
pub struct Inference {
    registry: Arc<FormatRegistry>,
    container_probe: Arc<dyn ContainerProbe>,
}

impl Inference {
    pub fn new(registry: Arc<FormatRegistry>, container_probe: Arc<dyn ContainerProbe>) -> Self {
        Self {
            registry,
            container_probe,
        }
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    /// Infer the descriptor for `bytes` fetched from `url`.
    ///
    /// When a hint is given (e.g. mirrored metadata), its size and content
    /// hash are reused. Never fails: unrecognized data yields an
    /// error-flagged descriptor.
    pub fn infer(&self, url: &str, bytes: &Bytes, hint: Option<&MediaInfo>) -> MediaInfo {
        if bytes.is_empty() {
            return MediaInfo::error(url);
        }

        let (size, hash) = hint
            .filter(|h| !h.is_error && !h.content_hash.is_empty())
            .map(|h| (h.size, h.content_hash.clone()))
            .unwrap_or_else(|| (bytes.len() as u64, content_hash(bytes)));

        let base = MediaInfo {
            size,
            content_hash: hash,
            url: url.to_string(),
            ..MediaInfo::default()
        };

        match self.probe(url, bytes) {
            Ok(probed) => probed.merge(base),
            Err(e) => {
                tracing::warn!(url, error = %e, "Could not infer media descriptor");
                MediaInfo::error(url)
            }
        }
    }

    /// [`Inference::infer`] on the blocking pool
    pub async fn infer_async(
        self: &Arc<Self>,
        url: String,
        bytes: Bytes,
        hint: Option<MediaInfo>,
    ) -> MediaInfo {
        let inference = self.clone();
        let fallback_url = url.clone();
        tokio::task::spawn_blocking(move || inference.infer(&url, &bytes, hint.as_ref()))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(url = %fallback_url, error = %e, "Inference task failed");
                MediaInfo::error(fallback_url)
            })
    }

    fn probe(&self, url: &str, bytes: &Bytes) -> Result<Probed, ProbeError> {
        let mut failures = Vec::with_capacity(3);

        match probe_image(bytes) {
            Ok(image) => {
                let format = self.registry.resolve_by_container(&[image.container]);
                return Ok(Probed {
                    format: format.name().to_string(),
                    width: Some(image.width),
                    height: Some(image.height),
                    ..Probed::default()
                });
            }
            Err(e) => failures.push(e),
        }

        let extension = source_extension(url);
        match probe_mp3(bytes, extension.as_deref()) {
            Ok(audio) => {
                return Ok(Probed {
                    format: "mp3".to_string(),
                    duration: audio.duration,
                    audio_codec: Some("mp3".to_string()),
                    channels: audio.channels,
                    sample_rate: audio.sample_rate,
                    ..Probed::default()
                });
            }
            Err(e) => failures.push(e),
        }

        let container = match self.container_probe.probe(bytes) {
            Ok(container) => container,
            Err(e) => {
                failures.push(e);
                tracing::debug!(url, failures = failures.len(), "Every probe rejected the data");
                return Err(ProbeError::All(failures));
            }
        };
        let names: Vec<&str> = container.format_names.iter().map(String::as_str).collect();
        let format = self.registry.resolve_by_container(&names);

        Ok(Probed {
            format: format.name().to_string(),
            width: container.width,
            height: container.height,
            duration: container.duration,
            video_codec: container.video_codec,
            audio_codec: container.audio_codec,
            channels: container.channels,
            sample_rate: container.sample_rate,
        })
    }
}

#[derive(Debug, Default)]
struct Probed {
    format: String,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<f64>,
    video_codec: Option<String>,
    audio_codec: Option<String>,
    channels: Option<u16>,
    sample_rate: Option<u32>,
}

impl Probed {
    fn merge(self, base: MediaInfo) -> MediaInfo {
        MediaInfo {
            width: self.width,
            height: self.height,
            format: self.format,
            duration: self.duration,
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            channels: self.channels,
            sample_rate: self.sample_rate,
            is_error: false,
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    struct FixedProbe(ContainerInfo);

    impl ContainerProbe for FixedProbe {
        fn probe(&self, _bytes: &Bytes) -> Result<ContainerInfo, ProbeError> {
            Ok(self.0.clone())
        }
    }

    fn inference(probe: Arc<dyn ContainerProbe>) -> Inference {
        Inference::new(Arc::new(FormatRegistry::with_defaults()), probe)
    }

    #[test]
    fn test_infers_png_dimensions() {
        let bytes = png_bytes(4, 3);
        let info = inference(Arc::new(NoContainerProbe)).infer("https://a.com/x.png", &bytes, None);

        assert!(!info.is_error);
        assert_eq!(info.format, "png");
        assert_eq!((info.width, info.height), (Some(4), Some(3)));
        assert_eq!(info.size, bytes.len() as u64);
        assert_eq!(info.content_hash, content_hash(&bytes));
    }

    #[test]
    fn test_hint_supplies_size_and_hash() {
        let bytes = png_bytes(2, 2);
        let hint = MediaInfo {
            size: 999,
            content_hash: "abc".to_string(),
            ..MediaInfo::default()
        };
        let info = inference(Arc::new(NoContainerProbe)).infer("x.png", &bytes, Some(&hint));
        assert_eq!(info.size, 999);
        assert_eq!(info.content_hash, "abc");
    }

    #[test]
    fn test_container_probe_resolves_webm() {
        let probe = FixedProbe(ContainerInfo {
            format_names: vec!["matroska".to_string(), "webm".to_string()],
            duration: Some(2.5),
            width: Some(640),
            height: Some(480),
            video_codec: Some("vp8".to_string()),
            audio_codec: Some("vorbis".to_string()),
            channels: Some(2),
            sample_rate: Some(44100),
        });
        let bytes = Bytes::from_static(b"\x1aE\xdf\xa3 definitely not an image");
        let info = inference(Arc::new(probe)).infer("https://a.com/v.webm", &bytes, None);

        assert_eq!(info.format, "webm");
        assert_eq!(info.video_codec.as_deref(), Some("vp8"));
        assert_eq!(info.duration, Some(2.5));
        assert!(info.has_audio());
    }

    #[test]
    fn test_probe_failures_are_collected() {
        let bytes = Bytes::from_static(b"plain text, no media in here");
        let err = inference(Arc::new(NoContainerProbe))
            .probe("https://a.com/notes.bin", &bytes)
            .unwrap_err();

        let ProbeError::All(failures) = &err else {
            panic!("expected collected failures, got {err:?}");
        };
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[1], ProbeError::Audio(_)));
        assert!(matches!(failures[2], ProbeError::Unavailable(_)));

        let message = err.to_string();
        assert!(message.contains("audio probe failed"));
        assert!(message.contains("container probe unavailable"));
    }

    #[test]
    fn test_unrecognized_data_is_error() {
        let info = inference(Arc::new(NoContainerProbe)).infer("a.bin", &Bytes::new(), None);
        assert!(info.is_error);
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let raw = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
                {"codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "48000"}
            ],
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.5"}
        }"#;
        let info = parse_ffprobe_output(raw).unwrap();
        assert_eq!(info.format_names[1], "mp4");
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.sample_rate, Some(48000));
        assert_eq!(info.duration, Some(10.5));

        assert!(parse_ffprobe_output(br#"{"streams": [], "format": {"format_name": "x"}}"#).is_err());
    }
}
