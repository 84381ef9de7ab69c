//! Durable tier seam.
//!
//! The orchestrator only sees this trait; the SQLite adapter lives in
//! [`crate::infra::db`].

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use super::entry::CacheEntry;
use super::filter::EntryFilter;
use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch a live entry and increment its persisted hit counter in the same
    /// statement.
    async fn get(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the row for `entry.key`.
    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    async fn delete(&self, key: &CacheKey) -> Result<u64, StoreError>;

    /// Delete rows whose expiry instant is before `now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError>;

    async fn delete_matching(&self, filter: &EntryFilter) -> Result<u64, StoreError>;

    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Number of live rows at `now`.
    async fn count(&self, now: OffsetDateTime) -> Result<u64, StoreError>;

    /// Release file handles. Later calls fail with [`StoreError::Unavailable`].
    async fn close(&self);
}
