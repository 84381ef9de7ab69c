use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use contextdocs::cache::{
    CacheConfig, CacheEntry, CacheError, CacheKey, DocFetcher, DocRequest, DocsCache,
    DurableStore, EntryFilter, FetchError, Invalidation, Maintainer, ManualClock, MetricsSink,
    NoopSink, StoreError, Tier, WarmReport,
};
use contextdocs::infra::db::SqliteDocStore;
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;

/// Wraps the SQLite store, counting reads and optionally failing writes.
struct CountingStore {
    inner: SqliteDocStore,
    gets: AtomicUsize,
    fail_writes: AtomicBool,
}

impl CountingStore {
    fn new(inner: SqliteDocStore) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for CountingStore {
    async fn get(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<CacheEntry>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key, now).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("disk I/O error"));
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<u64, StoreError> {
        self.inner.delete(key).await
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        self.inner.delete_expired(now).await
    }

    async fn delete_matching(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        self.inner.delete_matching(filter).await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.inner.delete_all().await
    }

    async fn count(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        self.inner.count(now).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[derive(Default)]
struct TierLog {
    hits: Mutex<Vec<Tier>>,
    misses: AtomicUsize,
    evictions: AtomicUsize,
}

impl TierLog {
    fn hits(&self) -> Vec<Tier> {
        self.hits.lock().expect("hits lock").clone()
    }
}

impl MetricsSink for TierLog {
    fn record_hit(&self, tier: Tier) {
        self.hits.lock().expect("hits lock").push(tier);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    _dir: TempDir,
    config: CacheConfig,
    clock: Arc<ManualClock>,
    store: Arc<CountingStore>,
    sink: Arc<TierLog>,
    cache: DocsCache,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = CacheConfig::default();
        config.durable.path = dir.path().join("cache.db");
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(CountingStore::new(
            SqliteDocStore::open(&config.durable)
                .await
                .expect("store opens"),
        ));
        let sink = Arc::new(TierLog::default());
        let cache = DocsCache::with_store(
            config.clone(),
            Some(store.clone()),
            clock.clone(),
            sink.clone(),
        )
        .expect("valid config");

        Self {
            _dir: dir,
            config,
            clock,
            store,
            sink,
            cache,
        }
    }

    /// A second cache over the same file, as after a process restart.
    async fn restart(&self) -> DocsCache {
        let store = SqliteDocStore::open(&self.config.durable)
            .await
            .expect("store reopens");
        DocsCache::with_store(
            self.config.clone(),
            Some(Arc::new(store)),
            self.clock.clone(),
            Arc::new(NoopSink),
        )
        .expect("valid config")
    }
}

fn payload(len: usize) -> Bytes {
    Bytes::from(
        "The useEffect hook synchronizes a component with an external system.\n"
            .repeat(len / 68 + 1)
            .into_bytes()
            .into_iter()
            .take(len)
            .collect::<Vec<u8>>(),
    )
}

#[tokio::test]
async fn set_then_get_returns_payload_unchanged() {
    let harness = Harness::new().await;
    for len in [0, 1, 500, 1024, 1025, 64 * 1024] {
        let topic = format!("topic-{len}");
        let written = payload(len);
        harness
            .cache
            .set("reactjs", &topic, 4000, written.clone())
            .await
            .expect("set");
        assert_eq!(
            harness.cache.get("reactjs", &topic, 4000).await,
            Some(written),
            "payload of {len} bytes"
        );
    }
}

#[tokio::test]
async fn token_budgets_in_one_bucket_share_an_entry() {
    let harness = Harness::new().await;
    let written = payload(500);
    harness
        .cache
        .set("reactjs", "hooks", 4000, written.clone())
        .await
        .expect("set");

    let found = harness.cache.get("reactjs", "hooks", 4050).await;
    assert_eq!(found.as_ref().map(Bytes::len), Some(500));
    assert_eq!(found, Some(written.clone()));
    assert_eq!(harness.cache.get("reactjs", "hooks", 3950).await, Some(written));
}

#[tokio::test]
async fn troubleshooting_entries_expire_after_two_hours() {
    let harness = Harness::new().await;
    harness
        .cache
        .set("x", "troubleshooting", 1000, payload(200))
        .await
        .expect("set");

    harness.clock.advance(Duration::from_secs(3 * 60 * 60));
    assert_eq!(harness.cache.get("x", "troubleshooting", 1000).await, None);

    let report = Maintainer::new(harness.cache.clone()).run_once().await;
    assert_eq!(report.expired_durable, 1);
    let stats = harness.cache.stats().await;
    assert_eq!(stats.memory.size, 0);
    assert_eq!(stats.durable.total_entries, 0);
}

#[tokio::test]
async fn durable_hits_are_promoted_into_memory() {
    let harness = Harness::new().await;
    let written = payload(2048);
    harness
        .cache
        .set("vue", "composition-api", 3000, written.clone())
        .await
        .expect("set");

    // A fresh process has an empty memory tier.
    let restarted = DocsCache::with_store(
        harness.config.clone(),
        Some(harness.store.clone()),
        harness.clock.clone(),
        harness.sink.clone(),
    )
    .expect("valid config");

    assert_eq!(
        restarted.get("vue", "composition-api", 3000).await,
        Some(written.clone())
    );
    assert_eq!(harness.store.gets(), 1);

    assert_eq!(
        restarted.get("vue", "composition-api", 3000).await,
        Some(written)
    );
    assert_eq!(harness.store.gets(), 1, "second read must not reach SQLite");
    assert_eq!(harness.sink.hits(), vec![Tier::Durable, Tier::Memory]);

    let stats = restarted.stats().await;
    assert_eq!(stats.memory.size, 1);
    assert_eq!(stats.durable.hit_rate, 1.0);
}

#[tokio::test]
async fn entries_survive_a_restart() {
    let harness = Harness::new().await;
    let written = payload(4096);
    harness
        .cache
        .set("/vercel/next.js", "routing", 6000, written.clone())
        .await
        .expect("set");
    harness.cache.close().await;

    let restarted = harness.restart().await;
    assert_eq!(
        restarted.get("/vercel/next.js", "routing", 6000).await,
        Some(written)
    );
}

#[tokio::test]
async fn invalidating_a_library_leaves_others_untouched() {
    let harness = Harness::new().await;
    for (library, topic) in [
        ("reactjs", "hooks"),
        ("reactjs", "examples"),
        ("vue", "hooks"),
    ] {
        harness
            .cache
            .set(library, topic, 2000, payload(100))
            .await
            .expect("set");
    }

    let removed = harness.cache.invalidate(Invalidation::library("ReactJS")).await;
    assert_eq!(removed, 4, "two entries in each tier");

    assert_eq!(harness.cache.get("reactjs", "hooks", 2000).await, None);
    assert_eq!(harness.cache.get("reactjs", "examples", 2000).await, None);
    assert!(harness.cache.get("vue", "hooks", 2000).await.is_some());

    let restarted = harness.restart().await;
    assert_eq!(restarted.get("reactjs", "hooks", 2000).await, None);
    assert!(restarted.get("vue", "hooks", 2000).await.is_some());
}

#[tokio::test]
async fn pattern_and_full_invalidation() {
    let harness = Harness::new().await;
    for (library, topic) in [
        ("reactjs", "troubleshooting"),
        ("vue", "troubleshooting"),
        ("vue", "examples"),
    ] {
        harness
            .cache
            .set(library, topic, 2000, payload(100))
            .await
            .expect("set");
    }

    let scope = Invalidation::pattern("*:troubleshooting").expect("pattern");
    assert_eq!(harness.cache.invalidate(scope).await, 4);
    assert!(harness.cache.get("vue", "examples", 2000).await.is_some());

    assert_eq!(harness.cache.invalidate(Invalidation::All).await, 2);
    let stats = harness.cache.stats().await;
    assert_eq!(stats.memory.size, 0);
    assert_eq!(stats.durable.total_entries, 0);
}

#[tokio::test]
async fn expired_invalidation_sweeps_both_tiers() {
    let harness = Harness::new().await;
    harness
        .cache
        .set("svelte", "troubleshooting", 1000, payload(100))
        .await
        .expect("set");
    harness
        .cache
        .set("svelte", "best-practices", 1000, payload(100))
        .await
        .expect("set");

    harness.clock.advance(Duration::from_secs(3 * 60 * 60));
    assert_eq!(harness.cache.invalidate(Invalidation::Expired).await, 2);
    assert_eq!(harness.cache.stats().await.memory.size, 1);
}

#[tokio::test]
async fn corrupt_durable_rows_read_as_misses_and_are_deleted() {
    let harness = Harness::new().await;
    harness
        .cache
        .set("angular", "signals", 2000, payload(100))
        .await
        .expect("set");

    sqlx::query("UPDATE doc_cache_entries SET metadata = 'garbage'")
        .execute(harness.store.inner.pool())
        .await
        .expect("corrupt rows");

    let restarted = harness.restart().await;
    assert_eq!(restarted.get("angular", "signals", 2000).await, None);
    assert_eq!(restarted.stats().await.durable.total_entries, 0);
}

#[tokio::test]
async fn inflated_size_claims_read_as_misses_and_are_deleted() {
    let harness = Harness::new().await;
    harness
        .cache
        .set("angular", "signals", 2000, payload(5000))
        .await
        .expect("set");

    sqlx::query(
        "UPDATE doc_cache_entries \
         SET metadata = json_set(metadata, '$.original_size', 9223372036854775807)",
    )
    .execute(harness.store.inner.pool())
    .await
    .expect("rewrite metadata");

    let restarted = harness.restart().await;
    assert_eq!(restarted.get("angular", "signals", 2000).await, None);
    assert_eq!(restarted.stats().await.durable.total_entries, 0);
}

#[tokio::test]
async fn durable_write_failure_still_caches_in_memory() {
    let harness = Harness::new().await;
    harness.store.fail_writes.store(true, Ordering::SeqCst);

    let err = harness
        .cache
        .set("reactjs", "hooks", 4000, payload(300))
        .await
        .expect_err("durable write fails");
    assert!(matches!(err, CacheError::StoreUnavailable { .. }));
    assert!(!err.is_fatal());

    assert_eq!(
        harness.cache.get("reactjs", "hooks", 4000).await,
        Some(payload(300))
    );
    let stats = harness.cache.stats().await;
    assert_eq!(stats.durable.errors, 1);
    assert_eq!(stats.durable.total_entries, 0);
}

#[tokio::test]
async fn closed_durable_tier_degrades_to_misses() {
    let harness = Harness::new().await;
    harness.cache.close().await;

    assert_eq!(harness.cache.get("reactjs", "hooks", 4000).await, None);
    assert_eq!(harness.sink.misses.load(Ordering::SeqCst), 1);
    assert_eq!(harness.cache.stats().await.durable.errors, 1);
}

#[tokio::test]
async fn open_falls_back_to_memory_when_the_file_cannot_be_created() {
    let dir = TempDir::new().expect("temp dir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").expect("blocker file");

    let mut config = CacheConfig::default();
    config.durable.path = blocker.join("cache.db");
    let cache = DocsCache::open(
        config,
        Arc::new(ManualClock::starting_now()),
        Arc::new(NoopSink),
    )
    .await
    .expect("opens memory-only");

    assert!(!cache.durable_enabled());
    cache
        .set("reactjs", "hooks", 4000, payload(10))
        .await
        .expect("memory-only set succeeds");
    assert!(cache.get("reactjs", "hooks", 4000).await.is_some());
}

#[tokio::test]
async fn context_separates_entries() {
    let harness = Harness::new().await;
    let next = DocRequest::new("reactjs", "routing", 4000).with_context(json!({"framework": "next"}));
    let remix =
        DocRequest::new("reactjs", "routing", 4000).with_context(json!({"framework": "remix"}));

    harness
        .cache
        .set_request(&next, Bytes::from_static(b"app router"), Some("text/plain"))
        .await
        .expect("set");

    assert_eq!(
        harness.cache.get_request(&next).await,
        Some(Bytes::from_static(b"app router"))
    );
    assert_eq!(harness.cache.get_request(&remix).await, None);
    assert_eq!(harness.cache.get("reactjs", "routing", 4000).await, None);
}

/// Serves canned documentation and records what was requested.
#[derive(Default)]
struct StubFetcher {
    calls: Mutex<Vec<String>>,
    missing: HashSet<String>,
}

#[async_trait]
impl DocFetcher for StubFetcher {
    async fn fetch(&self, request: &DocRequest) -> Result<Bytes, FetchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.library_id.clone());
        if self.missing.contains(&request.library_id) {
            return Err(FetchError::NotFound {
                library_id: request.library_id.clone(),
            });
        }
        Ok(Bytes::from(format!("docs for {}", request.library_id)))
    }
}

#[tokio::test]
async fn warm_fetches_only_uncached_requests() {
    let harness = Harness::new().await;
    harness
        .cache
        .set("reactjs", "hooks", 4000, payload(100))
        .await
        .expect("set");

    let fetcher = StubFetcher {
        missing: HashSet::from(["ghost".to_string()]),
        ..Default::default()
    };
    let requests = vec![
        DocRequest::new("reactjs", "hooks", 4000),
        DocRequest::new("vue", "hooks", 4000),
        DocRequest::new("svelte", "hooks", 4000),
        DocRequest::new("ghost", "hooks", 4000),
    ];

    let report = harness.cache.warm(&fetcher, requests).await;
    assert_eq!(
        report,
        WarmReport {
            cached: 1,
            fetched: 2,
            failed: 1,
        }
    );

    let mut calls = fetcher.calls.lock().expect("calls lock").clone();
    calls.sort();
    assert_eq!(calls, vec!["ghost", "svelte", "vue"]);
    assert_eq!(
        harness.cache.get("vue", "hooks", 4000).await,
        Some(Bytes::from_static(b"docs for vue"))
    );
}

#[tokio::test]
async fn get_or_fetch_fills_the_cache_once() {
    let harness = Harness::new().await;
    let fetcher = StubFetcher::default();
    let request = DocRequest::new("solid", "signals", 1500);

    let first = harness
        .cache
        .get_or_fetch(&request, &fetcher)
        .await
        .expect("fetched");
    let second = harness
        .cache
        .get_or_fetch(&request, &fetcher)
        .await
        .expect("cached");

    assert_eq!(first, second);
    assert_eq!(fetcher.calls.lock().expect("calls lock").len(), 1);
}

#[tokio::test]
async fn get_or_fetch_propagates_fetch_errors() {
    let harness = Harness::new().await;
    let fetcher = StubFetcher {
        missing: HashSet::from(["ghost".to_string()]),
        ..Default::default()
    };

    let err = harness
        .cache
        .get_or_fetch(&DocRequest::new("ghost", "", 1000), &fetcher)
        .await
        .expect_err("missing library");
    assert!(matches!(err, FetchError::NotFound { .. }));
}

#[tokio::test]
async fn maintenance_evicts_only_from_memory() {
    let mut harness = Harness::new().await;
    harness.config.memory.max_entries = 2;
    let cache = DocsCache::with_store(
        harness.config.clone(),
        Some(harness.store.clone()),
        harness.clock.clone(),
        harness.sink.clone(),
    )
    .expect("valid config");

    for library in ["a", "b", "c", "d"] {
        cache
            .set(library, "hooks", 1000, payload(64))
            .await
            .expect("set");
    }
    for library in ["c", "d"] {
        assert!(cache.get(library, "hooks", 1000).await.is_some());
    }

    let report = Maintainer::new(cache.clone()).run_once().await;
    assert_eq!(report.evicted, 2);
    assert_eq!(harness.sink.evictions.load(Ordering::SeqCst), 2);

    let stats = cache.stats().await;
    assert_eq!(stats.memory.size, 2);
    assert_eq!(stats.memory.evictions, 2);
    assert_eq!(stats.durable.total_entries, 4);

    // Evicted entries come back from the durable tier.
    assert!(cache.get("a", "hooks", 1000).await.is_some());
    assert_eq!(cache.stats().await.memory.size, 3);
}

fn worker_payload(worker: usize, item: usize) -> Bytes {
    Bytes::from(format!("{:>200}", format!("worker {worker} item {item}")))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn maintenance_runs_safely_alongside_traffic() {
    const WORKERS: usize = 8;
    const ITEMS: usize = 40;

    let mut harness = Harness::new().await;
    harness.config.memory.max_entries = 50;
    let cache = DocsCache::with_store(
        harness.config.clone(),
        Some(harness.store.clone()),
        harness.clock.clone(),
        Arc::new(NoopSink),
    )
    .expect("valid config");

    let mut tasks = Vec::new();
    for worker in 0..WORKERS {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            for item in 0..ITEMS {
                let library = format!("lib{worker}");
                let topic = format!("topic{item}");
                cache
                    .set(&library, &topic, 1000, worker_payload(worker, item))
                    .await
                    .expect("set");
                let read = cache.get(&library, &topic, 1000).await;
                assert_eq!(read, Some(worker_payload(worker, item)));
            }
        }));
    }

    let sweeper = {
        let maintainer = Maintainer::new(cache.clone());
        tokio::spawn(async move {
            for _ in 0..20 {
                maintainer.run_once().await;
                tokio::task::yield_now().await;
            }
        })
    };

    for task in tasks {
        task.await.expect("worker task");
    }
    sweeper.await.expect("sweeper task");

    Maintainer::new(cache.clone()).run_once().await;
    let stats = cache.stats().await;
    assert!(stats.memory.size <= 50);
    assert_eq!(stats.memory.bytes, stats.memory.size as u64 * 200);
    assert_eq!(stats.durable.total_entries, (WORKERS * ITEMS) as u64);

    for worker in 0..WORKERS {
        for item in 0..ITEMS {
            let read = cache
                .get(&format!("lib{worker}"), &format!("topic{item}"), 1000)
                .await;
            assert_eq!(read, Some(worker_payload(worker, item)));
        }
    }
}
