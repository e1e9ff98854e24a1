//! Request counters kept by the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline-wide request counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub requests_panicked: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_not_found: AtomicU64,

    // Latency tracking (sum and count; no histograms)
    pub total_latency_ms: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub requests_panicked: u64,
    pub requests_rejected: u64,
    pub requests_not_found: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed request.
    pub fn record_request(&self, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Request whose chain returned an error.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Request whose chain panicked.
    pub fn record_panic(&self) {
        self.requests_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Request refused before the chain ran (e.g. body too large).
    pub fn record_rejection(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Request no middleware answered.
    pub fn record_not_found(&self) {
        self.requests_not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.requests_total.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_panicked: self.requests_panicked.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_not_found: self.requests_not_found.load(Ordering::Relaxed),
        }
    }
}
