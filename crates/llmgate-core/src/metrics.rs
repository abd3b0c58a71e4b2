//! Gateway counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free request counters shared by every dispatch
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    vendor_calls: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
    exhausted: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vendor_call(&self) {
        self.vendor_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A request moved on to a provider other than its first candidate
    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let vendor_calls = self.vendor_calls.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let successes = vendor_calls.saturating_sub(failures);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            vendor_calls,
            failures,
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            avg_latency_ms: if successes == 0 {
                0.0
            } else {
                total_latency as f64 / successes as f64
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub vendor_calls: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub exhausted: u64,
    /// Mean latency of successful vendor calls
    pub avg_latency_ms: f64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.requests as f64
    }
}
