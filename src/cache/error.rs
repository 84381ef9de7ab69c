//! Cache error taxonomy.

use thiserror::Error;

use super::codec::CodecError;
use super::durable::StoreError;

/// Errors raised by the cache.
///
/// Only [`CacheError::Configuration`] is fatal: it stops [`super::DocsCache`]
/// from opening at all. The remaining variants are reported to the caller of
/// `set` for logging and are otherwise absorbed by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("durable store unavailable: {message}")]
    StoreUnavailable { message: String },
    #[error("corrupt cache entry `{key}`: {reason}")]
    CorruptEntry { key: String, reason: String },
    #[error("compression failed: {0}")]
    Compression(#[from] CodecError),
    #[error("invalid cache configuration for `{key}`: {reason}")]
    Configuration { key: &'static str, reason: String },
}

impl CacheError {
    pub fn configuration(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key,
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::StoreUnavailable { message },
            StoreError::Corrupt { key, reason } => Self::CorruptEntry { key, reason },
        }
    }
}
