use bytes::Bytes;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::traits::{DecodeError, MediaFormat, MediaKind};
use super::DecodeContext;
use crate::handler::{AudioClip, SwapperHandler};
use crate::identifier::Identifier;
use crate::media::RawMediaData;

/// Decode MP3 bytes into interleaved f32 samples
pub fn decode_mp3(name: &str, bytes: &Bytes) -> Result<AudioClip, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.clone())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Audio(e.to_string()))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| DecodeError::Audio("no default audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Audio("unknown sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| DecodeError::Audio("unknown channel count".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Audio(e.to_string()))?;

    let mut samples = Vec::<f32>::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            // End of stream
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(DecodeError::Audio(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(clip = name, error = e, "Skipping undecodable packet");
            }
            Err(e) => return Err(DecodeError::Audio(e.to_string())),
        }
    }

    Ok(AudioClip {
        name: name.to_string(),
        samples: samples.into(),
        channels: channels.count() as u16,
        sample_rate,
    })
}

/// MP3, decoded in place into an audio clip
#[derive(Debug, Clone, Default)]
pub struct Mp3Format;

impl MediaFormat for Mp3Format {
    fn name(&self) -> &str {
        "mp3"
    }

    fn primary_extension(&self) -> &str {
        "mp3"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn container_names(&self) -> &[&'static str] {
        &["mp3"]
    }

    fn decode(
        &self,
        id: &Identifier,
        data: &RawMediaData,
        ctx: &DecodeContext,
    ) -> Result<SwapperHandler, DecodeError> {
        let clip = decode_mp3(&id.to_string(), data.bytes())?;
        ctx.spawn_cache_write(data.clone());

        Ok(SwapperHandler::Audio {
            id: id.clone(),
            clip,
        })
    }
}
