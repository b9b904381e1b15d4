use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::formats::{AnimationMode, DecodeSettings};
use crate::query::MediaQuery;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queries: Vec<MediaQuery>,
}

/// On-disk media cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub base_dir: PathBuf,
    /// Files untouched for longer are pruned at start-up
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: default_cache_dir(),
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_max_age_days() -> u32 {
    2
}

/// Network fetching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause between spawning the fetches of one remote query
    #[serde(default = "default_spawn_delay_ms")]
    pub spawn_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            spawn_delay_ms: default_spawn_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_spawn_delay_ms() -> u64 {
    300
}

fn default_user_agent() -> String {
    concat!("mediaswap/", env!("CARGO_PKG_VERSION")).to_string()
}

/// External encoder and codec policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub allow_transcoding: bool,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_video_codecs")]
    pub video_codecs: Vec<String>,
    #[serde(default = "default_audio_codecs")]
    pub audio_codecs: Vec<String>,
    #[serde(default)]
    pub animation: AnimationMode,
}

impl TranscodeConfig {
    pub fn decode_settings(&self) -> DecodeSettings {
        DecodeSettings {
            allow_transcoding: self.allow_transcoding,
            video_codecs: self.video_codecs.clone(),
            audio_codecs: self.audio_codecs.clone(),
            animation: self.animation,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            allow_transcoding: false,
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            video_codecs: default_video_codecs(),
            audio_codecs: default_audio_codecs(),
            animation: AnimationMode::default(),
        }
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_video_codecs() -> Vec<String> {
    vec!["vp8".to_string()]
}

fn default_audio_codecs() -> Vec<String> {
    vec!["vorbis".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionConfig {
    #[serde(default = "default_true")]
    pub prioritize_new: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            prioritize_new: true,
        }
    }
}

/// Censoring of rated or tagged media
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub restrictive: bool,
    #[serde(default)]
    pub blacklist_tags: Vec<String>,
    #[serde(default)]
    pub whitelist_tags: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            restrictive: true,
            blacklist_tags: Vec::new(),
            whitelist_tags: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Designated-thread loop
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
    /// Directory holding the placeholder images
    pub placeholders_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            drain_batch: default_drain_batch(),
            placeholders_dir: None,
        }
    }
}

fn default_tick_ms() -> u64 {
    50
}

fn default_drain_batch() -> usize {
    crate::storage::DEFAULT_DRAIN_BATCH
}

/// Status router
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}
