//! Background Maintainer.
//!
//! Each cycle sweeps expired entries out of memory, evicts the least-hit
//! entries until the in-process bounds hold, then sweeps the durable tier.

use std::time::{Duration, Instant};

use metrics::histogram;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::metrics::METRIC_MAINTENANCE_MS;
use super::orchestrator::DocsCache;

/// What one maintenance cycle removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_memory: usize,
    pub evicted: usize,
    pub expired_durable: u64,
}

pub struct Maintainer {
    cache: DocsCache,
    interval: Duration,
}

impl Maintainer {
    /// Maintainer running at the cache's configured cleanup interval.
    pub fn new(cache: DocsCache) -> Self {
        let interval = cache.config().memory.cleanup_interval;
        Self { cache, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run_once(&self) -> MaintenanceReport {
        let started = Instant::now();
        let inner = &self.cache.inner;
        let now = self.cache.now();

        let expired_memory = inner.memory.remove_expired(now);

        let bounds = &inner.config.memory;
        let evicted = inner
            .memory
            .evict_to_bounds(bounds.max_entries, bounds.max_bytes);
        for key in &evicted {
            debug!(key = %key, "Evicted cache entry");
            inner.sink.record_eviction();
        }
        inner.stats.evictions(evicted.len() as u64);

        let expired_durable = match &inner.durable {
            Some(store) => store.delete_expired(now).await.unwrap_or_else(|err| {
                self.cache.durable_failed("delete_expired", &err);
                0
            }),
            None => 0,
        };

        let report = MaintenanceReport {
            expired_memory,
            evicted: evicted.len(),
            expired_durable,
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_MAINTENANCE_MS).record(elapsed_ms);
        info!(
            expired_memory = report.expired_memory,
            evicted = report.evicted,
            expired_durable = report.expired_durable,
            memory_entries = inner.memory.count(),
            memory_bytes = inner.memory.size_bytes(),
            elapsed_ms,
            "Cache maintenance completed"
        );

        report
    }

    /// Run cycles on a Tokio task until the handle is shut down.
    pub fn spawn(self) -> MaintainerHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        });
        MaintainerHandle { task }
    }
}

pub struct MaintainerHandle {
    task: JoinHandle<()>,
}

impl MaintainerHandle {
    /// Stop the loop. A cycle in flight is cancelled at its next await point.
    pub async fn shutdown(self) {
        self.task.abort();
        if let Err(err) = self.task.await
            && !err.is_cancelled()
        {
            error!(error = %err, "Cache maintainer task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::CacheConfig;
    use crate::cache::metrics::NoopSink;

    fn cache(max_entries: usize, clock: Arc<ManualClock>) -> DocsCache {
        let mut config = CacheConfig::memory_only();
        config.memory.max_entries = max_entries;
        DocsCache::with_store(config, None, clock, Arc::new(NoopSink)).expect("valid config")
    }

    #[tokio::test]
    async fn cycle_evicts_least_hit_entries_down_to_bound() {
        let cache = cache(3, Arc::new(ManualClock::starting_now()));
        for library in ["a", "b", "c", "d", "e"] {
            cache
                .set(library, "hooks", 1000, Bytes::from_static(b"docs"))
                .await
                .expect("set");
        }
        for library in ["c", "d", "e"] {
            assert!(cache.get(library, "hooks", 1000).await.is_some());
        }

        let report = Maintainer::new(cache.clone()).run_once().await;
        assert_eq!(report.evicted, 2);
        assert_eq!(cache.stats().await.memory.size, 3);
        assert_eq!(cache.stats().await.memory.evictions, 2);
        for library in ["c", "d", "e"] {
            assert!(cache.get(library, "hooks", 1000).await.is_some());
        }
        assert!(cache.get("a", "hooks", 1000).await.is_none());
    }

    #[tokio::test]
    async fn cycle_sweeps_expired_entries() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = cache(10, clock.clone());
        cache
            .set("vue", "troubleshooting", 1000, Bytes::from_static(b"short"))
            .await
            .expect("set");
        cache
            .set("vue", "api-reference", 1000, Bytes::from_static(b"long"))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(3 * 60 * 60));
        let report = Maintainer::new(cache.clone()).run_once().await;
        assert_eq!(report.expired_memory, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(cache.stats().await.memory.size, 1);
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let cache = cache(10, Arc::new(ManualClock::starting_now()));
        let handle = Maintainer::new(cache)
            .with_interval(Duration::from_millis(5))
            .spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
