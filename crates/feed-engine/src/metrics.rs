//! Best-effort engine metrics.
//!
//! The engine hands named numeric samples to a `MetricsSink`.  Sinks must not
//! block or fail; anything expensive belongs on the other side of a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

pub const LOAD_LATENCY_MS: &str = "load_latency_ms";
pub const PRELOAD_HIT: &str = "preload_hit";
pub const PRELOAD_HIT_RATE: &str = "preload_hit_rate";
pub const FETCH_APPENDED: &str = "fetch_appended";

pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &'static str, value: f64);
}

/// Logs every sample at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, name: &'static str, value: f64) {
        debug!(metric = name, value, "metric sample");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _name: &'static str, _value: f64) {}
}

/// Counts how often the newly active item was already loaded when the user
/// landed on it.
#[derive(Debug, Clone, Default)]
pub struct PreloadStats {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl PreloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of activations that found a ready player, `None` before the first.
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }
}
