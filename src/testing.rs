//! Shared fixtures for unit tests

use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cache::MediaCache;
use crate::concurrency::ConcurrencyGroups;
use crate::formats::{DecodeContext, DecodeSettings, FormatRegistry};
use crate::media::{DisabledTranscoder, Inference, NoContainerProbe};
use crate::observability::Metrics;
use crate::storage::{DEFAULT_DRAIN_BATCH, MediaStorage};
use crate::thread::{DesignatedThread, MainThread};

/// Solid red PNG of the given size
pub(crate) fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

/// Silent mono MPEG-1 Layer III stream at 128 kbit/s and 44.1 kHz. Every
/// frame carries zeroed side info, so it decodes to 1152 zero samples.
pub(crate) fn mp3_bytes(frames: usize) -> Bytes {
    // 144 * 128_000 / 44_100, no padding
    const FRAME_LEN: usize = 417;
    let mut out = Vec::with_capacity(frames * FRAME_LEN);
    for _ in 0..frames {
        let mut frame = [0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
        out.extend_from_slice(&frame);
    }
    Bytes::from(out)
}

/// In-memory storage and decode context on the current runtime
pub(crate) struct Harness {
    pub storage: Arc<MediaStorage>,
    pub ctx: DecodeContext,
    pub metrics: Arc<Metrics>,
    designated: DesignatedThread,
}

impl Harness {
    pub fn new() -> Self {
        let registry = Arc::new(FormatRegistry::with_defaults());
        let metrics = Arc::new(Metrics::new());
        let storage = Arc::new(MediaStorage::new(DEFAULT_DRAIN_BATCH, metrics.clone()));
        let ctx = DecodeContext {
            groups: Arc::new(ConcurrencyGroups::new(Handle::current())),
            cache: Arc::new(MediaCache::in_memory(registry.clone())),
            inference: Arc::new(Inference::new(registry, Arc::new(NoContainerProbe))),
            transcoder: Arc::new(DisabledTranscoder),
            storage: storage.clone(),
            settings: Arc::new(DecodeSettings::default()),
            metrics: metrics.clone(),
        };

        Self {
            storage,
            ctx,
            metrics,
            designated: DesignatedThread::new(),
        }
    }

    pub fn main(&self) -> MainThread {
        self.designated.claim().unwrap()
    }

    /// Drain until nothing is left, yielding to background tasks in between
    pub async fn settle(&self) {
        for _ in 0..200 {
            let report = self.storage.drain(&self.main(), &self.ctx);
            if report.is_idle() && !self.storage.has_pending_work() && self.storage.in_flight() == 0
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
