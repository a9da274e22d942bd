//! Engine metrics.
//!
//! Plain atomics, read through [`MetricsSummary`] snapshots.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::api::PluginKind;

/// Thread-safe atomic counter.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram using fixed buckets.
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            bucket_bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets in milliseconds, from a cached native load up to a slow clone.
    pub fn default_latency() -> Self {
        Self::new(vec![
            1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0,
        ])
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .bucket_bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored scaled by 1000 to keep sub-millisecond precision.
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Observation count per bucket; the last bucket is unbounded.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

/// Counters for one [`Engine`](crate::Engine).
pub struct EngineMetrics {
    pub requests_total: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub loads_total: Counter,
    pub load_failures: Counter,
    pub construction_failures: Counter,
    pub retrieval_failures: Counter,
    pub loads_in_flight: Gauge,
    pub load_latency_ms: Histogram,
    pub resource_requests: Counter,
    pub data_source_requests: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new(),
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            loads_total: Counter::new(),
            load_failures: Counter::new(),
            construction_failures: Counter::new(),
            retrieval_failures: Counter::new(),
            loads_in_flight: Gauge::new(),
            load_latency_ms: Histogram::default_latency(),
            resource_requests: Counter::new(),
            data_source_requests: Counter::new(),
        }
    }

    pub fn record_request(&self, kind: PluginKind) {
        self.requests_total.inc();
        match kind {
            PluginKind::Resource => self.resource_requests.inc(),
            PluginKind::DataSource => self.data_source_requests.inc(),
        }
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    pub fn record_load_start(&self) {
        self.loads_total.inc();
        self.loads_in_flight.inc();
    }

    pub fn record_load_end(&self, outcome: LoadOutcome, latency_ms: f64) {
        self.loads_in_flight.dec();
        self.load_latency_ms.observe(latency_ms);
        match outcome {
            LoadOutcome::Loaded => {}
            LoadOutcome::LoadFailed => self.load_failures.inc(),
            LoadOutcome::ConstructionFailed => self.construction_failures.inc(),
        }
    }

    pub fn record_retrieval_failure(&self) {
        self.retrieval_failures.inc();
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// How a plugin construction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    LoadFailed,
    ConstructionFailed,
}

/// Point-in-time snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub resource_requests: u64,
    pub data_source_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_loads: u64,
    pub failed_loads: u64,
    pub failed_constructions: u64,
    pub failed_retrievals: u64,
    pub avg_load_latency_ms: f64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &EngineMetrics) -> Self {
        let count = metrics.load_latency_ms.count();
        let avg_latency = if count > 0 {
            metrics.load_latency_ms.sum_ms() / count as f64
        } else {
            0.0
        };

        Self {
            total_requests: metrics.requests_total.get(),
            resource_requests: metrics.resource_requests.get(),
            data_source_requests: metrics.data_source_requests.get(),
            cache_hits: metrics.cache_hits.get(),
            cache_misses: metrics.cache_misses.get(),
            total_loads: metrics.loads_total.get(),
            failed_loads: metrics.load_failures.get(),
            failed_constructions: metrics.construction_failures.get(),
            failed_retrievals: metrics.retrieval_failures.get(),
            avg_load_latency_ms: avg_latency,
        }
    }

    /// Share of lookups served from cache, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
