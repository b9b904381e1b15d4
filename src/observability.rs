//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle shared by every pipeline component
#[derive(Debug, Default)]
pub struct Metrics {
    queries_registered: AtomicU64,
    cache_hits: AtomicU64,
    network_fetches: AtomicU64,
    fetch_failures: AtomicU64,
    handlers_stored: AtomicU64,
    decode_failures: AtomicU64,
    transcodes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_registered(&self) {
        self.queries_registered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "queries_registered", "Metric incremented");
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "cache_hits", "Metric incremented");
    }

    pub fn network_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "network_fetches", "Metric incremented");
    }

    pub fn fetch_failed(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "fetch_failures", "Metric incremented");
    }

    pub fn handler_stored(&self) {
        self.handlers_stored.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "handlers_stored", "Metric incremented");
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "decode_failures", "Metric incremented");
    }

    pub fn transcoded(&self) {
        self.transcodes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "transcodes", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_registered: self.queries_registered.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            handlers_stored: self.handlers_stored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            transcodes: self.transcodes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_registered: u64,
    pub cache_hits: u64,
    pub network_fetches: u64,
    pub fetch_failures: u64,
    pub handlers_stored: u64,
    pub decode_failures: u64,
    pub transcodes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let metrics = Metrics::new();
        metrics.cache_hit();
        metrics.cache_hit();
        metrics.transcoded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.transcodes, 1);
        assert_eq!(snapshot.network_fetches, 0);
    }
}
