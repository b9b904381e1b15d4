use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use super::traits::{DecodeError, MediaFormat, MediaKind};
use super::video::create_webm_handler;
use super::DecodeContext;
use crate::handler::{CapabilityClass, Frame, ImageSequence, SwapperHandler, Texture};
use crate::identifier::Identifier;
use crate::media::{RawMediaData, TranscodeRequest};

/// How animated GIFs are turned into handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationMode {
    /// Transcode to WebM and play as video
    #[default]
    Video,
    /// Decode every frame into an image sequence
    Sequence,
    /// Show the first frame as a still image
    FirstFrame,
}

/// Formats decoded in place into a texture
#[derive(Debug, Clone)]
pub struct StaticImageFormat {
    name: &'static str,
    primary_extension: &'static str,
    additional_extensions: &'static [&'static str],
    containers: &'static [&'static str],
}

impl StaticImageFormat {
    pub fn png() -> Self {
        Self {
            name: "png",
            primary_extension: "png",
            additional_extensions: &[],
            containers: &["png"],
        }
    }

    pub fn jpeg() -> Self {
        Self {
            name: "jpeg",
            primary_extension: "jpg",
            additional_extensions: &["jpeg", "jpe"],
            containers: &["jpg", "jpeg"],
        }
    }
}

impl MediaFormat for StaticImageFormat {
    fn name(&self) -> &str {
        self.name
    }

    fn primary_extension(&self) -> &str {
        self.primary_extension
    }

    fn additional_extensions(&self) -> &[&'static str] {
        self.additional_extensions
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    fn container_names(&self) -> &[&'static str] {
        self.containers
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        ctx.spawn_cache_write(data.clone());
        let texture = Texture::decode(data.bytes())?;

        Ok(SwapperHandler::Material {
            id: id.clone(),
            texture,
        })
    }
}

/// WebP, converted to PNG before use
#[derive(Debug, Clone, Default)]
pub struct WebpFormat;

fn convert_to_png(bytes: &[u8]) -> Result<Bytes, image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}

impl MediaFormat for WebpFormat {
    fn name(&self) -> &str {
        "webp"
    }

    fn primary_extension(&self) -> &str {
        "webp"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    fn container_names(&self) -> &[&'static str] {
        &["webp"]
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let mut data = data.clone();
        let task_ctx = ctx.clone();
        let task_id = id.clone();

        ctx.spawn_delayed(id.clone(), data.info().clone(), async move {
            let source = data.bytes().clone();
            let converted = tokio::task::spawn_blocking(move || convert_to_png(&source)).await;

            let png = match converted {
                Ok(Ok(png)) => png,
                Ok(Err(e)) => {
                    tracing::warn!(id = %task_id, error = %e, "WebP conversion failed");
                    return (data.info().clone(), None);
                }
                Err(e) => {
                    tracing::error!(id = %task_id, error = %e, "WebP conversion task failed");
                    return (data.info().clone(), None);
                }
            };

            data.replace_bytes(png, "png", &task_ctx.inference).await;
            task_ctx.cache.cache_if_eligible(&data).await;

            let handler = match Texture::decode(data.bytes()) {
                Ok(texture) => Some(SwapperHandler::Material {
                    id: task_id.clone(),
                    texture,
                }),
                Err(e) => {
                    tracing::warn!(id = %task_id, error = %e, "Converted image did not decode");
                    None
                }
            };

            (data.info().clone(), handler)
        });

        Ok(SwapperHandler::Delayed {
            id: id.clone(),
            class: CapabilityClass::Mesh,
            multiple: true,
        })
    }
}

/// Animated GIF, handled per [`AnimationMode`]
#[derive(Debug, Clone, Default)]
pub struct GifFormat;

fn decode_frames(bytes: &[u8]) -> Result<ImageSequence, image::ImageError> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = decoder.into_frames().collect_frames()?;

    Ok(ImageSequence {
        frames: frames
            .into_iter()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                let millis = numer as f64 / denom.max(1) as f64;
                Frame {
                    delay: Duration::from_secs_f64(millis / 1000.0),
                    texture: Texture::from_image(DynamicImage::ImageRgba8(frame.into_buffer())),
                }
            })
            .collect(),
    })
}

impl GifFormat {
    /// Video mode needs a transcoder and a cache file to play from; without
    /// either the animation is decoded into frames instead.
    fn effective_mode(data: &RawMediaData, ctx: &DecodeContext) -> AnimationMode {
        match ctx.settings.animation {
            AnimationMode::Video if !ctx.settings.allow_transcoding || !data.is_cacheable() => {
                AnimationMode::Sequence
            }
            mode => mode,
        }
    }
}

impl MediaFormat for GifFormat {
    fn name(&self) -> &str {
        "gif"
    }

    fn primary_extension(&self) -> &str {
        "gif"
    }

    /// Animations play on video surfaces, whichever mode decodes them
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn container_names(&self) -> &[&'static str] {
        &["gif"]
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let mode = Self::effective_mode(data, ctx);
        let mut data = data.clone();
        let task_ctx = ctx.clone();
        let task_id = id.clone();

        ctx.spawn_delayed(id.clone(), data.info().clone(), async move {
            match mode {
                AnimationMode::Video => {
                    let transcoder = task_ctx.transcoder.clone();
                    let request = TranscodeRequest::gif_to_webm();
                    let converter_id = task_id.clone();
                    task_ctx.metrics.transcoded();

                    let cached = task_ctx
                        .cache
                        .convert_and_cache(&mut data, "webm", &task_ctx.inference, |bytes| async move {
                            transcoder
                                .transcode(&converter_id, bytes, &request)
                                .await
                                .map_err(|e| {
                                    tracing::warn!(id = %converter_id, error = %e, "GIF transcode failed");
                                })
                                .ok()
                        })
                        .await;

                    if !cached && !data.is_converted() {
                        return (data.info().clone(), None);
                    }

                    let handler = create_webm_handler(&task_id, &mut data, &task_ctx).await;
                    (data.info().clone(), handler)
                }
                AnimationMode::Sequence => {
                    task_ctx.cache.cache_if_eligible(&data).await;
                    let source = data.bytes().clone();
                    let frames = tokio::task::spawn_blocking(move || decode_frames(&source)).await;

                    let handler = match frames {
                        Ok(Ok(sequence)) if !sequence.frames.is_empty() => {
                            Some(SwapperHandler::Sequence {
                                id: task_id.clone(),
                                sequence,
                            })
                        }
                        Ok(Ok(_)) => {
                            tracing::warn!(id = %task_id, "GIF has no frames");
                            None
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(id = %task_id, error = %e, "GIF frames did not decode");
                            None
                        }
                        Err(e) => {
                            tracing::error!(id = %task_id, error = %e, "GIF decode task failed");
                            None
                        }
                    };
                    (data.info().clone(), handler)
                }
                AnimationMode::FirstFrame => {
                    task_ctx.cache.cache_if_eligible(&data).await;
                    let handler = Texture::decode(data.bytes())
                        .map_err(|e| {
                            tracing::warn!(id = %task_id, error = %e, "GIF first frame did not decode");
                        })
                        .ok()
                        .map(|texture| SwapperHandler::Material {
                            id: task_id.clone(),
                            texture,
                        });
                    (data.info().clone(), handler)
                }
            }
        });

        Ok(SwapperHandler::Delayed {
            id: id.clone(),
            class: CapabilityClass::Mesh,
            multiple: mode != AnimationMode::Video,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba, RgbaImage};

    fn gif_bytes(frames: usize) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            for i in 0..frames {
                let shade = (i * 40) as u8;
                let buffer = RgbaImage::from_pixel(2, 2, Rgba([shade, 0, 0, 255]));
                let frame = image::Frame::from_parts(
                    buffer,
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                );
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    #[test]
    fn test_decode_frames_keeps_delays() {
        let sequence = decode_frames(&gif_bytes(3)).unwrap();
        assert_eq!(sequence.frames.len(), 3);
        assert_eq!(sequence.frames[0].texture.width, 2);
        assert_eq!(sequence.total_duration(), Duration::from_millis(300));
    }

    #[test]
    fn test_gif_is_a_mesh_video() {
        assert_eq!(GifFormat.kind(), MediaKind::Video);
        assert!(CapabilityClass::Mesh.media_kinds().contains(&GifFormat.kind()));
        assert!(!CapabilityClass::General.media_kinds().contains(&GifFormat.kind()));
    }

    #[test]
    fn test_convert_to_png_produces_png() {
        let png = convert_to_png(&gif_bytes(1)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
