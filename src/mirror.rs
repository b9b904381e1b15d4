//! Mirroring triples: enough about one identifier for another instance to
//! materialize it
//!
//! [`FullMediaData`] travels as JSON through serde, or in the compact
//! protobuf form of [`MirrorRecord`].

use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{Identifier, IdentifierError};
use crate::media::MediaInfo;
use crate::query::{MediaRating, QueryResult};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("unknown query result type: {0}")]
    UnknownResult(i32),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Identifier, descriptor and query result of one piece of media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullMediaData {
    pub id: Identifier,
    pub info: MediaInfo,
    pub result: QueryResult,
}

impl FullMediaData {
    pub fn new(id: Identifier, info: MediaInfo, result: QueryResult) -> Self {
        Self { id, info, result }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(MirrorRecord::from(self).encode_to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        MirrorRecord::decode(bytes)?.try_into()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ResultType {
    Empty = 0,
    Local = 1,
    Remote = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MirrorInfo {
    #[prost(uint32, optional, tag = "1")]
    pub width: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub height: Option<u32>,
    #[prost(string, tag = "3")]
    pub format: String,
    #[prost(uint64, tag = "4")]
    pub size: u64,
    #[prost(string, tag = "5")]
    pub content_hash: String,
    #[prost(string, tag = "6")]
    pub url: String,
    #[prost(double, optional, tag = "7")]
    pub duration: Option<f64>,
    #[prost(string, optional, tag = "8")]
    pub video_codec: Option<String>,
    #[prost(string, optional, tag = "9")]
    pub audio_codec: Option<String>,
    #[prost(uint32, optional, tag = "10")]
    pub channels: Option<u32>,
    #[prost(uint32, optional, tag = "11")]
    pub sample_rate: Option<u32>,
    #[prost(bool, tag = "12")]
    pub is_error: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MirrorResult {
    #[prost(enumeration = "ResultType", tag = "1")]
    pub result_type: i32,
    /// Origin path for local results, domain for remote ones
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub rating: String,
    #[prost(string, repeated, tag = "4")]
    pub tags: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MirrorRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub info: Option<MirrorInfo>,
    #[prost(message, optional, tag = "3")]
    pub result: Option<MirrorResult>,
}

impl From<&MediaInfo> for MirrorInfo {
    fn from(info: &MediaInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            format: info.format.clone(),
            size: info.size,
            content_hash: info.content_hash.clone(),
            url: info.url.clone(),
            duration: info.duration,
            video_codec: info.video_codec.clone(),
            audio_codec: info.audio_codec.clone(),
            channels: info.channels.map(u32::from),
            sample_rate: info.sample_rate,
            is_error: info.is_error,
        }
    }
}

impl From<MirrorInfo> for MediaInfo {
    fn from(info: MirrorInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            format: info.format,
            size: info.size,
            content_hash: info.content_hash,
            url: info.url,
            duration: info.duration,
            video_codec: info.video_codec,
            audio_codec: info.audio_codec,
            channels: info.channels.and_then(|c| u16::try_from(c).ok()),
            sample_rate: info.sample_rate,
            is_error: info.is_error,
        }
    }
}

impl From<&QueryResult> for MirrorResult {
    fn from(result: &QueryResult) -> Self {
        let (result_type, source, rating, tags) = match result {
            QueryResult::Local {
                origin,
                rating,
                tags,
            } => (ResultType::Local, origin.clone(), *rating, tags.clone()),
            QueryResult::Remote {
                domain,
                rating,
                tags,
            } => (ResultType::Remote, domain.clone(), *rating, tags.clone()),
            QueryResult::Empty => (ResultType::Empty, String::new(), MediaRating::Safe, vec![]),
        };

        Self {
            result_type: result_type as i32,
            source,
            rating: rating.as_char().to_string(),
            tags,
        }
    }
}

impl TryFrom<MirrorResult> for QueryResult {
    type Error = MirrorError;

    fn try_from(result: MirrorResult) -> Result<Self> {
        let rating = MediaRating::parse(&result.rating);
        match ResultType::try_from(result.result_type) {
            Ok(ResultType::Empty) => Ok(QueryResult::Empty),
            Ok(ResultType::Local) => Ok(QueryResult::Local {
                origin: result.source,
                rating,
                tags: result.tags,
            }),
            Ok(ResultType::Remote) => Ok(QueryResult::Remote {
                domain: result.source,
                rating,
                tags: result.tags,
            }),
            Err(_) => Err(MirrorError::UnknownResult(result.result_type)),
        }
    }
}

impl From<&FullMediaData> for MirrorRecord {
    fn from(full: &FullMediaData) -> Self {
        Self {
            id: full.id.to_string(),
            info: Some(MirrorInfo::from(&full.info)),
            result: Some(MirrorResult::from(&full.result)),
        }
    }
}

impl TryFrom<MirrorRecord> for FullMediaData {
    type Error = MirrorError;

    fn try_from(record: MirrorRecord) -> Result<Self> {
        Ok(Self {
            id: Identifier::parse(&record.id)?,
            info: record.info.map(MediaInfo::from).unwrap_or_default(),
            result: match record.result {
                Some(result) => result.try_into()?,
                None => QueryResult::Empty,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FullMediaData {
        FullMediaData::new(
            Identifier::parse("i.example.com:clip").unwrap(),
            MediaInfo {
                width: Some(640),
                height: Some(360),
                format: "webm".to_string(),
                size: 1024,
                url: "https://i.example.com/clip.webm".to_string(),
                duration: Some(3.5),
                video_codec: Some("vp8".to_string()),
                audio_codec: Some("vorbis".to_string()),
                channels: Some(2),
                sample_rate: Some(48_000),
                ..MediaInfo::default()
            },
            QueryResult::Remote {
                domain: "i.example.com".to_string(),
                rating: MediaRating::Questionable,
                tags: vec!["loop".to_string()],
            },
        )
    }

    #[test]
    fn test_protobuf_form_preserves_triple() {
        let full = sample();
        let decoded = FullMediaData::decode(&full.encode()).unwrap();
        assert_eq!(decoded, full);
    }

    #[test]
    fn test_json_form_uses_identifier_string() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], "i.example.com:clip");
        assert_eq!(json["result"]["type"], "remote");
    }

    #[test]
    fn test_bad_identifier_is_rejected() {
        let record = MirrorRecord {
            id: "no-namespace".to_string(),
            info: None,
            result: None,
        };
        let bytes = record.encode_to_vec();
        assert!(matches!(
            FullMediaData::decode(&bytes),
            Err(MirrorError::Identifier(_))
        ));
    }

    #[test]
    fn test_unknown_result_type_is_rejected() {
        let record = MirrorRecord {
            id: "a.com:b".to_string(),
            info: None,
            result: Some(MirrorResult {
                result_type: 9,
                ..MirrorResult::default()
            }),
        };
        assert!(matches!(
            FullMediaData::try_from(record),
            Err(MirrorError::UnknownResult(9))
        ));
    }
}
