//! The unit of storage shared by both tiers.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time};

use super::codec::{self, CompressionAlgorithm};
use super::error::CacheError;
use super::keys::{CacheKey, SCHEMA_VERSION};

pub const DEFAULT_CONTENT_TYPE: &str = "text/markdown";

/// Diagnostic fields persisted as a JSON blob alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub original_size: u64,
    pub content_type: String,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<CompressionAlgorithm>,
}

impl EntryMetadata {
    pub fn new(original_size: usize, content_type: impl Into<String>) -> Self {
        Self {
            original_size: original_size as u64,
            content_type: content_type.into(),
            schema_version: SCHEMA_VERSION.to_string(),
            encoding: None,
        }
    }
}

/// A cached documentation payload.
///
/// Tiers exchange entries by value. Only `hits` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Stored bytes; compressed when `compressed` is set.
    pub payload: Bytes,
    pub created_at: OffsetDateTime,
    pub ttl: Duration,
    pub hits: u64,
    pub library_id: String,
    pub topic: String,
    pub token_budget: u32,
    pub compressed: bool,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// `created_at + ttl`, saturating at the largest representable instant.
    pub fn expires_at(&self) -> OffsetDateTime {
        time::Duration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add(ttl))
            .unwrap_or_else(|| Date::MAX.with_time(Time::MAX).assume_utc())
    }

    /// An entry is live through its expiry instant and expired strictly after.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at()
    }

    /// Bytes held by the tier for this entry.
    pub fn stored_size(&self) -> usize {
        self.payload.len()
    }

    /// The payload as the caller wrote it.
    pub fn decoded_payload(&self) -> Result<Bytes, CacheError> {
        if !self.compressed {
            return Ok(self.payload.clone());
        }

        let corrupt = |reason: String| CacheError::CorruptEntry {
            key: self.key.to_string(),
            reason,
        };
        let algorithm = self
            .metadata
            .encoding
            .ok_or_else(|| corrupt("compressed entry has no encoding".to_string()))?;
        let expected = usize::try_from(self.metadata.original_size)
            .map_err(|_| corrupt("original size exceeds addressable memory".to_string()))?;

        codec::decompress(algorithm, &self.payload, expected)
            .map(Bytes::from)
            .map_err(|err| corrupt(err.to_string()))
    }
}
