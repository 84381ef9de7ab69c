//! Cache configuration.
//!
//! Built once at startup (see [`crate::config`]) and immutable afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::codec::CompressionAlgorithm;
use super::error::CacheError;

pub(crate) const DEFAULT_MAX_ENTRIES: usize = 1000;
pub(crate) const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;
pub(crate) const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
pub(crate) const DEFAULT_DURABLE_PATH: &str = "contextdocs-cache.db";
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 4096;
pub(crate) const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub(crate) const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub(crate) const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;
pub(crate) const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub(crate) const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
pub(crate) const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub(crate) const DEFAULT_WARM_CONCURRENCY: usize = 4;
/// Longest lifetime any entry may be given (one year).
pub(crate) const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const HOUR: u64 = 60 * 60;

/// Topic TTL overrides applied when the configuration does not supply a table.
///
/// Fast-moving topics expire sooner than reference material.
pub(crate) const DEFAULT_TOPIC_TTLS: &[(&str, u64)] = &[
    ("troubleshooting", 2 * HOUR),
    ("examples", 6 * HOUR),
    ("getting-started", 24 * HOUR),
    ("api-reference", 72 * HOUR),
    ("best-practices", 72 * HOUR),
];

/// Complete cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub memory: MemoryConfig,
    pub durable: DurableConfig,
    pub compression: CompressionConfig,
    pub ttl: TtlConfig,
    pub warm: WarmConfig,
}

/// Bounds for the in-process tier.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of resident entries after a maintenance cycle.
    pub max_entries: usize,
    /// Maximum aggregate payload bytes after a maintenance cycle.
    pub max_bytes: u64,
    /// Interval between Background Maintainer cycles.
    pub cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

/// SQLite journal mode for the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

/// SQLite `synchronous` level for the durable tier.
///
/// `Normal` with WAL may lose the last commits on power loss but never
/// corrupts the file. A lost cache row only costs a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
    Extra,
}

impl FromStr for JournalMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "truncate" => Ok(Self::Truncate),
            "persist" => Ok(Self::Persist),
            "memory" => Ok(Self::Memory),
            "wal" => Ok(Self::Wal),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown journal mode `{other}`")),
        }
    }
}

impl FromStr for Synchronous {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "normal" => Ok(Self::Normal),
            "full" => Ok(Self::Full),
            "extra" => Ok(Self::Extra),
            other => Err(format!("unknown synchronous level `{other}`")),
        }
    }
}

/// Durable tier location and SQLite tuning.
#[derive(Debug, Clone)]
pub struct DurableConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub page_size: u32,
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_DURABLE_PATH),
            page_size: DEFAULT_PAGE_SIZE,
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Payload compression applied before persistence.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    /// Payloads strictly larger than this are compressed.
    pub threshold_bytes: usize,
    /// flate2 level, 0 (store) to 9 (best).
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::Gzip,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// TTL defaults, per-topic overrides and the global ceiling.
#[derive(Debug, Clone)]
pub struct TtlConfig {
    pub default_ttl: Duration,
    pub max_age: Duration,
    pub topics: BTreeMap<String, Duration>,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            topics: default_topic_ttls(),
        }
    }
}

pub(crate) fn default_topic_ttls() -> BTreeMap<String, Duration> {
    DEFAULT_TOPIC_TTLS
        .iter()
        .map(|(topic, secs)| ((*topic).to_string(), Duration::from_secs(*secs)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct WarmConfig {
    /// Maximum concurrent fetches while warming.
    pub concurrency: usize,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_WARM_CONCURRENCY,
        }
    }
}

impl CacheConfig {
    /// Reject bounds that indicate a deployment mistake.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.memory.max_entries == 0 {
            return Err(CacheError::configuration(
                "cache.memory.max_entries",
                "must be greater than zero",
            ));
        }
        if self.memory.max_bytes == 0 {
            return Err(CacheError::configuration(
                "cache.memory.max_bytes",
                "must be greater than zero",
            ));
        }
        if self.memory.cleanup_interval.is_zero() {
            return Err(CacheError::configuration(
                "cache.memory.cleanup_interval_secs",
                "must be greater than zero",
            ));
        }

        if self.durable.enabled {
            if self.durable.path.as_os_str().is_empty() {
                return Err(CacheError::configuration(
                    "cache.durable.path",
                    "path must not be empty",
                ));
            }
            let page_size = self.durable.page_size;
            if !(512..=65536).contains(&page_size) || !page_size.is_power_of_two() {
                return Err(CacheError::configuration(
                    "cache.durable.page_size",
                    format!("{page_size} is not a power of two between 512 and 65536"),
                ));
            }
            if self.durable.max_connections == 0 {
                return Err(CacheError::configuration(
                    "cache.durable.max_connections",
                    "must be greater than zero",
                ));
            }
        }

        if self.compression.level > 9 {
            return Err(CacheError::configuration(
                "cache.compression.level",
                format!("{} is outside 0..=9", self.compression.level),
            ));
        }

        check_ttl("cache.ttl.default_secs", self.ttl.default_ttl)?;
        check_ttl("cache.ttl.max_age_secs", self.ttl.max_age)?;
        for (topic, ttl) in &self.ttl.topics {
            check_ttl("cache.ttl.topics", *ttl).map_err(|_| {
                CacheError::configuration(
                    "cache.ttl.topics",
                    format!(
                        "ttl for topic `{topic}` must be between 1 and {MAX_TTL_SECS} seconds"
                    ),
                )
            })?;
        }

        if self.warm.concurrency == 0 {
            return Err(CacheError::configuration(
                "cache.warm.concurrency",
                "must be greater than zero",
            ));
        }

        Ok(())
    }

    /// In-memory only configuration, used when the durable tier is not wanted.
    pub fn memory_only() -> Self {
        Self {
            durable: DurableConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn check_ttl(key: &'static str, ttl: Duration) -> Result<(), CacheError> {
    if ttl.is_zero() || ttl > Duration::from_secs(MAX_TTL_SECS) {
        return Err(CacheError::configuration(
            key,
            format!("must be between 1 and {MAX_TTL_SECS} seconds"),
        ));
    }
    Ok(())
}
