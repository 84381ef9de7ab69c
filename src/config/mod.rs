//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, GlobalOverrides, InvalidateArgs, LookupArgs, MaintainArgs, PutArgs,
};

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CacheConfig, CacheError, CompressionAlgorithm, CompressionConfig, DurableConfig, JournalMode,
    MemoryConfig, Synchronous, TtlConfig, WarmConfig,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "contextdocs";
const ENV_PREFIX: &str = "CONTEXTDOCS";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl From<CacheError> for LoadError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Configuration { key, reason } => Self::Invalid { key, reason },
            other => Self::invalid("cache", other.to_string()),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Maintain(args)) = cli.command.as_ref() {
        raw.apply_maintain_overrides(args);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.cache_path.as_ref() {
            self.cache.durable.path = Some(path.clone());
        }
        if overrides.no_durable {
            self.cache.durable.enabled = Some(false);
        }
    }

    fn apply_maintain_overrides(&mut self, args: &MaintainArgs) {
        if let Some(seconds) = args.interval_secs {
            self.cache.memory.cleanup_interval_secs = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let logging = build_logging_settings(raw.logging)?;
        let cache = build_cache_config(raw.cache)?;
        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let config = CacheConfig {
        memory: build_memory_config(cache.memory)?,
        durable: build_durable_config(cache.durable)?,
        compression: build_compression_config(cache.compression)?,
        ttl: build_ttl_config(cache.ttl),
        warm: build_warm_config(cache.warm)?,
    };
    config.validate()?;
    Ok(config)
}

fn build_memory_config(memory: RawMemorySettings) -> Result<MemoryConfig, LoadError> {
    let defaults = MemoryConfig::default();
    let max_entries = match memory.max_entries {
        Some(value) => to_usize(value, "cache.memory.max_entries")?,
        None => defaults.max_entries,
    };

    Ok(MemoryConfig {
        max_entries,
        max_bytes: memory.max_bytes.unwrap_or(defaults.max_bytes),
        cleanup_interval: memory
            .cleanup_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.cleanup_interval),
    })
}

fn build_durable_config(durable: RawDurableSettings) -> Result<DurableConfig, LoadError> {
    let defaults = DurableConfig::default();

    let journal_mode = match durable.journal_mode {
        Some(value) => JournalMode::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.durable.journal_mode", reason))?,
        None => defaults.journal_mode,
    };
    let synchronous = match durable.synchronous {
        Some(value) => Synchronous::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.durable.synchronous", reason))?,
        None => defaults.synchronous,
    };
    let path = match durable.path {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "cache.durable.path",
                "path must not be empty",
            ));
        }
        Some(path) => path,
        None => defaults.path,
    };

    Ok(DurableConfig {
        enabled: durable.enabled.unwrap_or(defaults.enabled),
        path,
        page_size: durable.page_size.unwrap_or(defaults.page_size),
        journal_mode,
        synchronous,
        busy_timeout: durable
            .busy_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout),
        max_connections: durable.max_connections.unwrap_or(defaults.max_connections),
    })
}

fn build_compression_config(
    compression: RawCompressionSettings,
) -> Result<CompressionConfig, LoadError> {
    let defaults = CompressionConfig::default();

    let algorithm = match compression.algorithm {
        Some(value) => CompressionAlgorithm::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.compression.algorithm", reason))?,
        None => defaults.algorithm,
    };
    let threshold_bytes = match compression.threshold_bytes {
        Some(value) => to_usize(value, "cache.compression.threshold_bytes")?,
        None => defaults.threshold_bytes,
    };

    Ok(CompressionConfig {
        enabled: compression.enabled.unwrap_or(defaults.enabled),
        algorithm,
        threshold_bytes,
        level: compression.level.unwrap_or(defaults.level),
    })
}

/// Configured topic TTLs are merged over the built-in table.
fn build_ttl_config(ttl: RawTtlSettings) -> TtlConfig {
    let defaults = TtlConfig::default();
    let mut topics = defaults.topics;
    for (topic, secs) in ttl.topics.unwrap_or_default() {
        topics.insert(topic.trim().to_lowercase(), Duration::from_secs(secs));
    }

    TtlConfig {
        default_ttl: ttl
            .default_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_ttl),
        max_age: ttl
            .max_age_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_age),
        topics,
    }
}

fn build_warm_config(warm: RawWarmSettings) -> Result<WarmConfig, LoadError> {
    let defaults = WarmConfig::default();
    let concurrency = match warm.concurrency {
        Some(value) => to_usize(value, "cache.warm.concurrency")?,
        None => defaults.concurrency,
    };
    Ok(WarmConfig { concurrency })
}

fn to_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    memory: RawMemorySettings,
    durable: RawDurableSettings,
    compression: RawCompressionSettings,
    ttl: RawTtlSettings,
    warm: RawWarmSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMemorySettings {
    max_entries: Option<u64>,
    max_bytes: Option<u64>,
    cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDurableSettings {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    page_size: Option<u32>,
    journal_mode: Option<String>,
    synchronous: Option<String>,
    busy_timeout_ms: Option<u64>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompressionSettings {
    enabled: Option<bool>,
    algorithm: Option<String>,
    threshold_bytes: Option<u64>,
    level: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    default_secs: Option<u64>,
    max_age_secs: Option<u64>,
    topics: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmSettings {
    concurrency: Option<u64>,
}
