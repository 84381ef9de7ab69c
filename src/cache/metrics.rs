//! Hit/miss/eviction reporting and the stats snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;

pub const METRIC_MEMORY_HIT: &str = "contextdocs_cache_memory_hit_total";
pub const METRIC_DURABLE_HIT: &str = "contextdocs_cache_durable_hit_total";
pub const METRIC_MISS: &str = "contextdocs_cache_miss_total";
pub const METRIC_EVICT: &str = "contextdocs_cache_evict_total";
pub const METRIC_DURABLE_ERROR: &str = "contextdocs_cache_durable_error_total";
pub const METRIC_GET_MS: &str = "contextdocs_cache_get_ms";
pub const METRIC_SET_MS: &str = "contextdocs_cache_set_ms";
pub const METRIC_MAINTENANCE_MS: &str = "contextdocs_cache_maintenance_ms";

/// The tier that served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Durable,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver for cache telemetry. Calls are fire-and-forget.
pub trait MetricsSink: Send + Sync {
    fn record_hit(&self, tier: Tier);
    fn record_miss(&self);
    fn record_eviction(&self);
}

/// Forwards to the globally installed `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn record_hit(&self, tier: Tier) {
        match tier {
            Tier::Memory => counter!(METRIC_MEMORY_HIT).increment(1),
            Tier::Durable => counter!(METRIC_DURABLE_HIT).increment(1),
        }
    }

    fn record_miss(&self) {
        counter!(METRIC_MISS).increment(1);
    }

    fn record_eviction(&self) {
        counter!(METRIC_EVICT).increment(1);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_hit(&self, _tier: Tier) {}
    fn record_miss(&self) {}
    fn record_eviction(&self) {}
}

/// Point-in-time view of cache behavior since the process started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub memory: MemoryStats,
    pub durable: DurableStats,
    pub performance: PerformanceStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Resident entries.
    pub size: usize,
    pub bytes: u64,
    pub hits: u64,
    /// Memory hits over all gets.
    pub hit_rate: f64,
    pub evictions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurableStats {
    pub enabled: bool,
    pub hits: u64,
    /// Durable hits over durable lookups, i.e. over memory misses.
    pub hit_rate: f64,
    /// Live rows, or 0 when the tier is disabled or unreachable.
    pub total_entries: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub gets: u64,
    pub sets: u64,
    pub misses: u64,
    pub avg_get_latency_ms: f64,
    pub avg_set_latency_ms: f64,
    /// Stored bytes over original bytes across all sets; 1.0 before any set.
    pub compression_ratio: f64,
}

/// Lock-free counters behind [`CacheStatsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    durable_lookups: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    durable_errors: AtomicU64,
    gets: AtomicU64,
    get_nanos: AtomicU64,
    sets: AtomicU64,
    set_nanos: AtomicU64,
    original_bytes: AtomicU64,
    stored_bytes: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

fn ratio(numerator: u64, denominator: u64, empty: f64) -> f64 {
    if denominator == 0 {
        empty
    } else {
        numerator as f64 / denominator as f64
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl StatsCollector {
    pub(crate) fn memory_hit(&self) {
        bump(&self.memory_hits, 1);
    }

    pub(crate) fn durable_lookup(&self, hit: bool) {
        bump(&self.durable_lookups, 1);
        if hit {
            bump(&self.durable_hits, 1);
        }
    }

    pub(crate) fn miss(&self) {
        bump(&self.misses, 1);
    }

    pub(crate) fn evictions(&self, count: u64) {
        bump(&self.evictions, count);
    }

    pub(crate) fn durable_error(&self) {
        bump(&self.durable_errors, 1);
    }

    pub(crate) fn get_completed(&self, elapsed: Duration) {
        bump(&self.gets, 1);
        bump(&self.get_nanos, nanos(elapsed));
    }

    pub(crate) fn set_completed(&self, elapsed: Duration, original: usize, stored: usize) {
        bump(&self.sets, 1);
        bump(&self.set_nanos, nanos(elapsed));
        bump(&self.original_bytes, original as u64);
        bump(&self.stored_bytes, stored as u64);
    }

    pub(crate) fn snapshot(
        &self,
        memory_size: usize,
        memory_bytes: u64,
        durable_enabled: bool,
        durable_entries: u64,
    ) -> CacheStatsSnapshot {
        let gets = load(&self.gets);
        let sets = load(&self.sets);
        let memory_hits = load(&self.memory_hits);
        let durable_hits = load(&self.durable_hits);

        CacheStatsSnapshot {
            memory: MemoryStats {
                size: memory_size,
                bytes: memory_bytes,
                hits: memory_hits,
                hit_rate: ratio(memory_hits, gets, 0.0),
                evictions: load(&self.evictions),
            },
            durable: DurableStats {
                enabled: durable_enabled,
                hits: durable_hits,
                hit_rate: ratio(durable_hits, load(&self.durable_lookups), 0.0),
                total_entries: durable_entries,
                errors: load(&self.durable_errors),
            },
            performance: PerformanceStats {
                gets,
                sets,
                misses: load(&self.misses),
                avg_get_latency_ms: ratio(load(&self.get_nanos), gets, 0.0) / 1_000_000.0,
                avg_set_latency_ms: ratio(load(&self.set_nanos), sets, 0.0) / 1_000_000.0,
                compression_ratio: ratio(
                    load(&self.stored_bytes),
                    load(&self.original_bytes),
                    1.0,
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_neutral_ratios() {
        let stats = StatsCollector::default().snapshot(0, 0, true, 0);
        assert_eq!(stats.memory.hit_rate, 0.0);
        assert_eq!(stats.durable.hit_rate, 0.0);
        assert_eq!(stats.performance.compression_ratio, 1.0);
        assert_eq!(stats.performance.avg_get_latency_ms, 0.0);
    }

    #[test]
    fn hit_rates_use_their_own_denominators() {
        let stats = StatsCollector::default();
        for _ in 0..3 {
            stats.memory_hit();
            stats.get_completed(Duration::from_millis(1));
        }
        stats.durable_lookup(true);
        stats.get_completed(Duration::from_millis(10));
        stats.durable_lookup(false);
        stats.miss();
        stats.get_completed(Duration::from_millis(10));

        let snapshot = stats.snapshot(3, 30, true, 4);
        assert_eq!(snapshot.memory.hit_rate, 0.6);
        assert_eq!(snapshot.durable.hit_rate, 0.5);
        assert_eq!(snapshot.performance.misses, 1);
        assert_eq!(snapshot.performance.gets, 5);
        assert!((snapshot.performance.avg_get_latency_ms - 4.6).abs() < 1e-9);
    }

    #[test]
    fn compression_ratio_tracks_stored_over_original() {
        let stats = StatsCollector::default();
        stats.set_completed(Duration::from_millis(2), 4000, 1000);
        stats.set_completed(Duration::from_millis(4), 1000, 1000);
        let snapshot = stats.snapshot(0, 0, false, 0);
        assert_eq!(snapshot.performance.compression_ratio, 0.4);
        assert_eq!(snapshot.performance.avg_set_latency_ms, 3.0);
    }

    #[test]
    fn tier_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Tier::Durable).expect("json"),
            r#""durable""#
        );
    }
}
