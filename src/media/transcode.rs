//! Re-encoding through an external encoder

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;

use crate::identifier::Identifier;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoding is disabled")]
    Disabled,
    #[error("encoder failed: {0}")]
    Encoder(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Target encoding for one transcode
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    /// Extension of the staged input file; the encoder sniffs the container
    pub input_format: String,
    pub output_format: String,
    pub video_encoder: String,
    pub audio_encoder: Option<String>,
    pub crf: u32,
    pub video_bitrate_kbps: u32,
}

impl TranscodeRequest {
    /// VP8/Vorbis WebM re-encode of an existing video container
    pub fn webm(input_format: impl Into<String>) -> Self {
        Self {
            input_format: input_format.into(),
            output_format: "webm".to_string(),
            video_encoder: "libvpx".to_string(),
            audio_encoder: Some("libvorbis".to_string()),
            crf: 15,
            video_bitrate_kbps: 2000,
        }
    }

    /// Silent WebM from an animated GIF
    pub fn gif_to_webm() -> Self {
        Self {
            input_format: "gif".to_string(),
            output_format: "webm".to_string(),
            video_encoder: "libvpx".to_string(),
            audio_encoder: None,
            crf: 10,
            video_bitrate_kbps: 2200,
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        id: &Identifier,
        input: Bytes,
        request: &TranscodeRequest,
    ) -> Result<Bytes, TranscodeError>;
}

/// Transcoder used when re-encoding is switched off
#[derive(Debug, Default, Clone)]
pub struct DisabledTranscoder;

#[async_trait]
impl Transcoder for DisabledTranscoder {
    async fn transcode(
        &self,
        _id: &Identifier,
        _input: Bytes,
        _request: &TranscodeRequest,
    ) -> Result<Bytes, TranscodeError> {
        Err(TranscodeError::Disabled)
    }
}

/// Transcoder backed by the `ffmpeg` executable, staging files in a work dir
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
        }
    }

    fn arguments(request: &TranscodeRequest, input: &str, output: &str) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string(),
            "-c:v".to_string(),
            request.video_encoder.clone(),
            "-crf".to_string(),
            request.crf.to_string(),
            "-b:v".to_string(),
            format!("{}k", request.video_bitrate_kbps),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ];

        match &request.audio_encoder {
            Some(encoder) => args.extend(["-c:a".to_string(), encoder.clone()]),
            None => args.push("-an".to_string()),
        }

        args.extend([
            "-f".to_string(),
            request.output_format.clone(),
            output.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        id: &Identifier,
        input: Bytes,
        request: &TranscodeRequest,
    ) -> Result<Bytes, TranscodeError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let stem = format!("{}_{}", id.namespace(), id.path());
        let input_path = self
            .work_dir
            .join(format!("{stem}.in.{}", request.input_format));
        let output_path = self
            .work_dir
            .join(format!("{stem}.out.{}", request.output_format));

        tokio::fs::write(&input_path, &input).await?;

        tracing::info!(
            id = %id,
            from = %request.input_format,
            to = %request.output_format,
            "Transcoding media"
        );

        let args = Self::arguments(
            request,
            &input_path.to_string_lossy(),
            &output_path.to_string_lossy(),
        );
        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;

        let result = match status {
            Ok(status) if status.success() => tokio::fs::read(&output_path)
                .await
                .map(Bytes::from)
                .map_err(TranscodeError::from),
            Ok(status) => Err(TranscodeError::Encoder(format!("ffmpeg exited with {status}"))),
            Err(e) => Err(TranscodeError::Encoder(format!(
                "cannot start {}: {e}",
                self.binary.display()
            ))),
        };

        let _ = tokio::fs::remove_file(&input_path).await;
        let _ = tokio::fs::remove_file(&output_path).await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webm_arguments_carry_audio_encoder() {
        let args = FfmpegTranscoder::arguments(&TranscodeRequest::webm("mp4"), "in", "out");
        let joined = args.join(" ");
        assert!(joined.contains("-i in"));
        assert!(joined.contains("-c:v libvpx -crf 15 -b:v 2000k"));
        assert!(joined.contains("-c:a libvorbis"));
        assert!(joined.ends_with("-f webm out"));
    }

    #[test]
    fn test_gif_arguments_drop_audio() {
        let args = FfmpegTranscoder::arguments(&TranscodeRequest::gif_to_webm(), "in", "out");
        assert!(args.contains(&"-an".to_string()));
        assert!(args.join(" ").contains("-crf 10 -b:v 2200k"));
    }

    #[tokio::test]
    async fn test_disabled_transcoder_refuses() {
        let id = Identifier::parse("local:a").unwrap();
        let result = DisabledTranscoder
            .transcode(&id, Bytes::new(), &TranscodeRequest::gif_to_webm())
            .await;
        assert!(matches!(result, Err(TranscodeError::Disabled)));
    }
}
