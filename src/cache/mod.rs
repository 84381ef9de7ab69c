//! Two-tier documentation cache.
//!
//! Payloads fetched from a documentation service are cached by library,
//! topic and token budget:
//!
//! - **Memory tier**: a bounded in-process map with hit counting
//! - **Durable tier**: a SQLite file that survives restarts
//!
//! [`DocsCache`] writes through both tiers and promotes durable hits into
//! memory. The [`Maintainer`] expires and evicts on a schedule.
//!
//! ## Configuration
//!
//! ```toml
//! [cache.memory]
//! max_entries = 1000
//! cleanup_interval_secs = 300
//!
//! [cache.ttl.topics]
//! troubleshooting = 7200
//! # ... see config.rs for all options
//! ```

pub mod clock;
mod codec;
mod config;
mod durable;
mod entry;
mod error;
mod filter;
mod keys;
mod lock;
mod maintainer;
pub mod metrics;
mod orchestrator;
mod request;
mod store;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{
    Codec, CodecError, CompressionAlgorithm, Encoded, MAX_INFLATE_RATIO, plausible_original_size,
};
pub use config::{
    CacheConfig, CompressionConfig, DurableConfig, JournalMode, MemoryConfig, Synchronous,
    TtlConfig, WarmConfig,
};
pub use durable::{DurableStore, StoreError};
pub use entry::{CacheEntry, DEFAULT_CONTENT_TYPE, EntryMetadata};
pub use error::CacheError;
pub use filter::{EntryFilter, Invalidation, KeyPattern};
pub use keys::{
    CacheKey, DEFAULT_TOPIC, DocKey, SCHEMA_VERSION, build_key, normalize_library_id,
    normalize_topic, round_token_budget,
};
pub use maintainer::{Maintainer, MaintainerHandle, MaintenanceReport};
pub use metrics::{CacheStatsSnapshot, MetricsSink, NoopSink, RecorderSink, Tier};
pub use orchestrator::DocsCache;
pub use request::{DocFetcher, DocRequest, FetchError, WarmReport};
pub use store::MemoryStore;
pub use ttl::TtlPolicy;
