//! The public face of the cache.
//!
//! [`DocsCache`] composes key derivation, TTL policy, compression and both
//! tiers. Lookups never surface internal failures: a broken durable tier, a
//! corrupt row or an undecodable payload all read as a miss and are reported
//! through logs and metrics instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::infra::db::SqliteDocStore;

use super::clock::Clock;
use super::codec::Codec;
use super::config::CacheConfig;
use super::durable::{DurableStore, StoreError};
use super::entry::{CacheEntry, DEFAULT_CONTENT_TYPE, EntryMetadata};
use super::error::CacheError;
use super::filter::{EntryFilter, Invalidation};
use super::keys::CacheKey;
use super::metrics::{
    CacheStatsSnapshot, METRIC_DURABLE_ERROR, METRIC_GET_MS, METRIC_SET_MS, MetricsSink,
    StatsCollector, Tier,
};
use super::request::{DocFetcher, DocRequest, FetchError, WarmReport};
use super::store::MemoryStore;
use super::ttl::TtlPolicy;

/// Two-tier documentation cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DocsCache {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) config: CacheConfig,
    pub(super) memory: MemoryStore,
    pub(super) durable: Option<Arc<dyn DurableStore>>,
    codec: Codec,
    ttl: TtlPolicy,
    clock: Arc<dyn Clock>,
    pub(super) sink: Arc<dyn MetricsSink>,
    pub(super) stats: StatsCollector,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

impl DocsCache {
    /// Validate `config` and open both tiers.
    ///
    /// A durable tier that cannot be opened is logged and skipped; the cache
    /// then runs memory-only. Only configuration errors fail.
    pub async fn open(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let durable: Option<Arc<dyn DurableStore>> = if config.durable.enabled {
            match SqliteDocStore::open(&config.durable).await {
                Ok(store) => Some(Arc::new(store)),
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %config.durable.path.display(),
                        "Durable cache unavailable; continuing in memory only"
                    );
                    counter!(METRIC_DURABLE_ERROR).increment(1);
                    None
                }
            }
        } else {
            None
        };

        Self::with_store(config, durable, clock, sink)
    }

    /// Assemble a cache over an already-open durable store.
    pub fn with_store(
        config: CacheConfig,
        durable: Option<Arc<dyn DurableStore>>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let inner = Inner {
            codec: Codec::new(&config.compression),
            ttl: TtlPolicy::new(&config.ttl),
            memory: MemoryStore::new(),
            durable,
            clock,
            sink,
            stats: StatsCollector::default(),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn durable_enabled(&self) -> bool {
        self.inner.durable.is_some()
    }

    pub(super) fn now(&self) -> OffsetDateTime {
        self.inner.clock.now()
    }

    pub async fn get(&self, library_id: &str, topic: &str, token_budget: u32) -> Option<Bytes> {
        self.get_request(&DocRequest::new(library_id, topic, token_budget))
            .await
    }

    pub async fn set(
        &self,
        library_id: &str,
        topic: &str,
        token_budget: u32,
        payload: Bytes,
    ) -> Result<(), CacheError> {
        self.set_request(&DocRequest::new(library_id, topic, token_budget), payload, None)
            .await
    }

    /// Look up a request in memory, then in the durable tier.
    ///
    /// A durable hit is copied into memory before returning.
    pub async fn get_request(&self, request: &DocRequest) -> Option<Bytes> {
        let started = Instant::now();
        let key = request.key().key;

        let found = self.lookup(&key).await;
        if found.is_none() {
            self.inner.stats.miss();
            self.inner.sink.record_miss();
            debug!(key = %key, "Cache miss");
        }

        let elapsed = started.elapsed();
        histogram!(METRIC_GET_MS).record(millis(elapsed));
        self.inner.stats.get_completed(elapsed);
        found
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let now = self.now();

        if let Some(entry) = self.inner.memory.get(key, now) {
            match entry.decoded_payload() {
                Ok(payload) => {
                    self.inner.stats.memory_hit();
                    self.inner.sink.record_hit(Tier::Memory);
                    return Some(payload);
                }
                Err(err) => {
                    self.discard_corrupt(key, &err.to_string()).await;
                    return None;
                }
            }
        }

        let durable = self.inner.durable.as_ref()?;
        let payload = match durable.get(key, now).await {
            Ok(Some(entry)) => match entry.decoded_payload() {
                Ok(payload) => {
                    self.inner.sink.record_hit(Tier::Durable);
                    self.inner.memory.set(entry);
                    Some(payload)
                }
                Err(err) => {
                    self.discard_corrupt(key, &err.to_string()).await;
                    None
                }
            },
            Ok(None) => None,
            Err(StoreError::Corrupt { reason, .. }) => {
                self.discard_corrupt(key, &reason).await;
                None
            }
            Err(err) => {
                self.durable_failed("get", &err);
                None
            }
        };
        self.inner.stats.durable_lookup(payload.is_some());
        payload
    }

    /// Drop an entry that cannot be decoded from both tiers.
    async fn discard_corrupt(&self, key: &CacheKey, reason: &str) {
        warn!(
            key = %key,
            reason,
            "Discarding corrupt cache entry"
        );
        self.inner.memory.delete(key);
        if let Some(durable) = &self.inner.durable
            && let Err(err) = durable.delete(key).await
        {
            self.durable_failed("delete", &err);
        }
    }

    pub(super) fn durable_failed(&self, operation: &'static str, err: &StoreError) {
        warn!(
            operation,
            error = %err,
            "Durable cache operation failed"
        );
        counter!(METRIC_DURABLE_ERROR).increment(1);
        self.inner.stats.durable_error();
    }

    /// Write a payload through both tiers.
    ///
    /// The in-process write always happens. A durable failure is returned
    /// after the fact for logging; the entry stays cached in memory.
    pub async fn set_request(
        &self,
        request: &DocRequest,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), CacheError> {
        let started = Instant::now();
        let doc_key = request.key();
        let ttl = self.inner.ttl.ttl_for(&doc_key.topic);
        let encoded = self.inner.codec.encode(&payload);

        let mut metadata = EntryMetadata::new(
            payload.len(),
            content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
        );
        metadata.encoding = encoded.algorithm;

        let entry = CacheEntry {
            key: doc_key.key,
            payload: encoded.payload,
            created_at: self.now(),
            ttl,
            hits: 0,
            library_id: doc_key.library_id,
            topic: doc_key.topic,
            token_budget: doc_key.token_budget,
            compressed: encoded.algorithm.is_some(),
            metadata,
        };
        let stored_size = entry.stored_size();

        self.inner.memory.set(entry.clone());
        let result = match &self.inner.durable {
            Some(durable) => durable.put(&entry).await.map_err(|err| {
                self.durable_failed("put", &err);
                CacheError::from(err)
            }),
            None => Ok(()),
        };

        let elapsed = started.elapsed();
        histogram!(METRIC_SET_MS).record(millis(elapsed));
        self.inner
            .stats
            .set_completed(elapsed, payload.len(), stored_size);
        debug!(
            key = %entry.key,
            ttl_secs = ttl.as_secs(),
            original_size = payload.len(),
            stored_size,
            compressed = entry.compressed,
            "Cache entry written"
        );

        result
    }

    /// Remove entries in `scope` from both tiers.
    ///
    /// Returns the sum of entries removed from each tier, so an entry resident
    /// in both counts twice. Durable failures are logged and contribute zero.
    pub async fn invalidate(&self, scope: Invalidation) -> u64 {
        let removed = match &scope {
            Invalidation::Library(library_id) => {
                self.remove_matching(&EntryFilter::library(library_id))
                    .await
            }
            Invalidation::Pattern(pattern) => {
                self.remove_matching(&EntryFilter::Pattern(pattern.clone()))
                    .await
            }
            Invalidation::Expired => {
                let (memory, durable) = self.sweep_expired(self.now()).await;
                memory as u64 + durable
            }
            Invalidation::All => {
                let memory = self.inner.memory.clear() as u64;
                let durable = match &self.inner.durable {
                    Some(store) => store.delete_all().await.unwrap_or_else(|err| {
                        self.durable_failed("delete_all", &err);
                        0
                    }),
                    None => 0,
                };
                memory + durable
            }
        };

        info!(
            scope = ?scope,
            removed,
            "Cache invalidated"
        );
        removed
    }

    async fn remove_matching(&self, filter: &EntryFilter) -> u64 {
        let memory = self.inner.memory.remove_matching(filter) as u64;
        let durable = match &self.inner.durable {
            Some(store) => store.delete_matching(filter).await.unwrap_or_else(|err| {
                self.durable_failed("delete_matching", &err);
                0
            }),
            None => 0,
        };
        memory + durable
    }

    /// Purge expired entries from memory and from the durable tier.
    pub(super) async fn sweep_expired(&self, now: OffsetDateTime) -> (usize, u64) {
        let memory = self.inner.memory.remove_expired(now);
        let durable = match &self.inner.durable {
            Some(store) => store.delete_expired(now).await.unwrap_or_else(|err| {
                self.durable_failed("delete_expired", &err);
                0
            }),
            None => 0,
        };
        (memory, durable)
    }

    /// Get, falling back to `fetcher` on a miss and caching what it returns.
    pub async fn get_or_fetch<F>(
        &self,
        request: &DocRequest,
        fetcher: &F,
    ) -> Result<Bytes, FetchError>
    where
        F: DocFetcher + ?Sized,
    {
        if let Some(payload) = self.get_request(request).await {
            return Ok(payload);
        }

        let payload = fetcher.fetch(request).await?;
        if let Err(err) = self.set_request(request, payload.clone(), None).await {
            debug!(
                error = %err,
                "Fetched payload cached in memory only"
            );
        }
        Ok(payload)
    }

    /// Fetch and cache every request not already cached in either tier.
    ///
    /// At most `cache.warm.concurrency` fetches run at once. Fetch failures
    /// are counted, never propagated.
    pub async fn warm<F>(&self, fetcher: &F, requests: Vec<DocRequest>) -> WarmReport
    where
        F: DocFetcher + ?Sized,
    {
        let started = Instant::now();
        let concurrency = self.inner.config.warm.concurrency;

        let outcomes: Vec<WarmOutcome> = stream::iter(requests)
            .map(|request| async move { self.warm_one(fetcher, &request).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = WarmReport::default();
        for outcome in outcomes {
            match outcome {
                WarmOutcome::Cached => report.cached += 1,
                WarmOutcome::Fetched => report.fetched += 1,
                WarmOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            cached = report.cached,
            fetched = report.fetched,
            failed = report.failed,
            elapsed_ms = millis(started.elapsed()),
            "Cache warm completed"
        );
        report
    }

    async fn warm_one<F>(&self, fetcher: &F, request: &DocRequest) -> WarmOutcome
    where
        F: DocFetcher + ?Sized,
    {
        let key = request.key().key;
        if self.is_cached(&key).await {
            return WarmOutcome::Cached;
        }

        match fetcher.fetch(request).await {
            Ok(payload) => {
                if let Err(err) = self.set_request(request, payload, None).await {
                    debug!(
                        key = %key,
                        error = %err,
                        "Warmed entry cached in memory only"
                    );
                }
                WarmOutcome::Fetched
            }
            Err(err) => {
                warn!(
                    key = %key,
                    error = %err,
                    "Warm fetch failed"
                );
                WarmOutcome::Failed
            }
        }
    }

    /// Presence check used by warming. A durable-only entry is promoted.
    async fn is_cached(&self, key: &CacheKey) -> bool {
        let now = self.now();
        if self.inner.memory.get(key, now).is_some() {
            return true;
        }
        let Some(durable) = &self.inner.durable else {
            return false;
        };
        match durable.get(key, now).await {
            Ok(Some(entry)) => {
                self.inner.memory.set(entry);
                true
            }
            Ok(None) | Err(StoreError::Corrupt { .. }) => false,
            Err(err) => {
                self.durable_failed("get", &err);
                false
            }
        }
    }

    /// Snapshot of counters and tier sizes. Never mutates the cache.
    pub async fn stats(&self) -> CacheStatsSnapshot {
        let total_entries = match &self.inner.durable {
            Some(store) => store.count(self.now()).await.unwrap_or_else(|err| {
                debug!(
                    error = %err,
                    "Durable entry count unavailable"
                );
                0
            }),
            None => 0,
        };

        self.inner.stats.snapshot(
            self.inner.memory.count(),
            self.inner.memory.size_bytes(),
            self.inner.durable.is_some(),
            total_entries,
        )
    }

    /// Close the durable tier. The in-process tier keeps serving.
    pub async fn close(&self) {
        if let Some(store) = &self.inner.durable {
            store.close().await;
            info!("Durable cache closed");
        }
    }
}

enum WarmOutcome {
    Cached,
    Fetched,
    Failed,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::metrics::NoopSink;

    fn memory_cache(clock: Arc<ManualClock>) -> DocsCache {
        DocsCache::with_store(CacheConfig::memory_only(), None, clock, Arc::new(NoopSink))
            .expect("valid config")
    }

    #[tokio::test]
    async fn round_trip_through_memory() {
        let cache = memory_cache(Arc::new(ManualClock::starting_now()));
        cache
            .set("reactjs", "hooks", 4000, Bytes::from_static(b"# useState"))
            .await
            .expect("set");

        let payload = cache.get("reactjs", "hooks", 4000).await;
        assert_eq!(payload.as_deref(), Some(&b"# useState"[..]));
    }

    #[tokio::test]
    async fn large_payloads_are_compressed_in_memory_and_restored() {
        let cache = memory_cache(Arc::new(ManualClock::starting_now()));
        let payload = Bytes::from("useEffect runs after render. ".repeat(200));
        cache
            .set("reactjs", "hooks", 4000, payload.clone())
            .await
            .expect("set");

        let stats = cache.stats().await;
        assert!(stats.memory.bytes < payload.len() as u64);
        assert!(stats.performance.compression_ratio < 1.0);
        assert_eq!(cache.get("reactjs", "hooks", 4000).await, Some(payload));
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = memory_cache(clock.clone());
        cache
            .set("x", "troubleshooting", 1000, Bytes::from_static(b"restart it"))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(3 * 60 * 60));
        assert_eq!(cache.get("x", "troubleshooting", 1000).await, None);
        assert_eq!(cache.stats().await.memory.size, 0);
    }

    #[tokio::test]
    async fn invalid_configuration_is_fatal() {
        let mut config = CacheConfig::memory_only();
        config.memory.max_entries = 0;
        let result = DocsCache::with_store(
            config,
            None,
            Arc::new(ManualClock::starting_now()),
            Arc::new(NoopSink),
        );
        assert!(matches!(result, Err(err) if err.is_fatal()));
    }

    #[tokio::test]
    async fn stats_count_misses_and_hits() {
        let cache = memory_cache(Arc::new(ManualClock::starting_now()));
        assert_eq!(cache.get("vue", "default", 2000).await, None);
        cache
            .set("vue", "", 2000, Bytes::from_static(b"docs"))
            .await
            .expect("set");
        assert!(cache.get("vue", "default", 2000).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.performance.misses, 1);
        assert_eq!(stats.memory.hits, 1);
        assert_eq!(stats.memory.hit_rate, 0.5);
        assert!(!stats.durable.enabled);
    }
}
