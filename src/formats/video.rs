use std::path::PathBuf;

use super::traits::{DecodeError, MediaFormat, MediaKind};
use super::DecodeContext;
use crate::handler::{CapabilityClass, SwapperHandler};
use crate::identifier::Identifier;
use crate::media::{RawMediaData, TranscodeRequest};

/// File a video handler plays from: the source for local media, the cache
/// file for downloaded media
fn playback_path(data: &RawMediaData, ctx: &DecodeContext) -> Option<PathBuf> {
    if data.is_local() {
        if data.is_converted() {
            tracing::warn!(id = %data.id(), "Converted local media has no file to play from");
            return None;
        }
        return data.local_path();
    }

    ctx.cache.file_path_for(data)
}

/// Build a video handler for WebM data, transcoding when its codecs are not
/// playable. Returns `None` when the data cannot be played.
pub(crate) async fn create_webm_handler(
    id: &Identifier,
    data: &mut RawMediaData,
    ctx: &DecodeContext,
) -> Option<SwapperHandler> {
    let info = data.info().clone();
    if !info.has_video() && !info.has_audio() {
        tracing::warn!(id = %id, "WebM data has neither audio nor video stream");
        return None;
    }

    let video_ok = info
        .video_codec
        .as_deref()
        .is_none_or(|codec| ctx.settings.is_valid_video_codec(codec));
    let audio_ok = info
        .audio_codec
        .as_deref()
        .is_none_or(|codec| ctx.settings.is_valid_audio_codec(codec));

    if !(video_ok && audio_ok) {
        if !ctx.settings.allow_transcoding {
            tracing::warn!(
                id = %id,
                video_codec = ?info.video_codec,
                audio_codec = ?info.audio_codec,
                "Unsupported codecs and transcoding is disabled"
            );
            return None;
        }
        if data.is_converted() {
            tracing::warn!(id = %id, "Codecs still unsupported after conversion");
            return None;
        }

        ctx.metrics.transcoded();
        let request = TranscodeRequest::webm(info.format.clone());
        match ctx
            .transcoder
            .transcode(id, data.bytes().clone(), &request)
            .await
        {
            Ok(converted) => {
                data.replace_bytes(converted, "webm", &ctx.inference).await;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "WebM transcode failed");
                // Keep the original so the next run does not download it again
                ctx.cache.cache_if_eligible(data).await;
                return None;
            }
        }
    }

    ctx.cache.cache_if_eligible(data).await;

    match playback_path(data, ctx) {
        Some(path) => Some(SwapperHandler::Video {
            id: id.clone(),
            path,
            info: data.info().clone(),
        }),
        None => {
            tracing::warn!(id = %id, "No playable file for video");
            None
        }
    }
}

/// WebM, checked against the codec policy
#[derive(Debug, Clone, Default)]
pub struct WebmFormat;

impl MediaFormat for WebmFormat {
    fn name(&self) -> &str {
        "webm"
    }

    fn primary_extension(&self) -> &str {
        "webm"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn container_names(&self) -> &[&'static str] {
        &["webm"]
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let multiple = !data.info().has_audio();
        let mut data = data.clone();
        let task_ctx = ctx.clone();
        let task_id = id.clone();

        ctx.spawn_delayed(id.clone(), data.info().clone(), async move {
            let handler = create_webm_handler(&task_id, &mut data, &task_ctx).await;
            (data.info().clone(), handler)
        });

        Ok(SwapperHandler::Delayed {
            id: id.clone(),
            class: CapabilityClass::Mesh,
            multiple,
        })
    }
}

/// MP4, played directly from its file
#[derive(Debug, Clone, Default)]
pub struct Mp4Format;

impl MediaFormat for Mp4Format {
    fn name(&self) -> &str {
        "mp4"
    }

    fn primary_extension(&self) -> &str {
        "mp4"
    }

    fn additional_extensions(&self) -> &[&'static str] {
        &["m4v"]
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn container_names(&self) -> &[&'static str] {
        &["mp4"]
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let path =
            playback_path(data, ctx).ok_or_else(|| DecodeError::NoPlayablePath(id.clone()))?;

        // Local sources are already on disk
        if data.is_local() {
            return Ok(SwapperHandler::Video {
                id: id.clone(),
                path,
                info: data.info().clone(),
            });
        }

        // The cache file is the playback path, so the handler waits for it
        let multiple = !data.info().has_audio();
        let data = data.clone();
        let task_ctx = ctx.clone();
        let task_id = id.clone();

        ctx.spawn_delayed(id.clone(), data.info().clone(), async move {
            let info = data.info().clone();
            if !task_ctx.cache.cache_if_eligible(&data).await {
                tracing::warn!(id = %task_id, "Video was not cached, nothing to play from");
                return (info, None);
            }

            let handler = SwapperHandler::Video {
                id: task_id,
                path,
                info: info.clone(),
            };
            (info, Some(handler))
        });

        Ok(SwapperHandler::Delayed {
            id: id.clone(),
            class: CapabilityClass::Mesh,
            multiple,
        })
    }
}
