//! Cache metrics emitted through the `metrics` facade.
//!
//! Every series carries a `cache` label naming the mediator instance. No
//! recorder is installed here; without one the calls are no-ops.

use metrics::{Counter, Histogram};

/// Metric handles for one cache mediator
#[derive(Clone)]
pub struct CacheMetrics {
    cache: String,
    hits: Counter,
    misses: Counter,
    expired: Counter,
    populated: Counter,
    payload_bytes: Histogram,
}

impl CacheMetrics {
    pub fn new(cache: impl Into<String>) -> Self {
        let cache = cache.into();
        Self {
            hits: metrics::counter!("mediation_cache_hits_total", "cache" => cache.clone()),
            misses: metrics::counter!("mediation_cache_misses_total", "cache" => cache.clone()),
            expired: metrics::counter!("mediation_cache_expired_total", "cache" => cache.clone()),
            populated: metrics::counter!("mediation_cache_populated_total", "cache" => cache.clone()),
            payload_bytes: metrics::histogram!("mediation_cache_payload_bytes", "cache" => cache.clone()),
            cache,
        }
    }

    pub fn record_hit(&self) {
        self.hits.increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.increment(1);
    }

    pub fn record_expired(&self) {
        self.expired.increment(1);
    }

    pub fn record_populated(&self, payload_size: usize) {
        self.populated.increment(1);
        self.payload_bytes.record(payload_size as f64);
    }

    pub fn record_dropped(&self, reason: &'static str) {
        metrics::counter!("mediation_cache_dropped_total", "cache" => self.cache.clone(), "reason" => reason)
            .increment(1);
    }

    /// A store call that failed or timed out and was skipped
    pub fn record_degraded(&self, operation: &'static str) {
        metrics::counter!("mediation_cache_degraded_total", "cache" => self.cache.clone(), "operation" => operation)
            .increment(1);
    }
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics").field("cache", &self.cache).finish()
    }
}
