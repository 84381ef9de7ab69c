use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use crate::cache::{
    CacheEntry, CacheKey, DurableStore, EntryFilter, EntryMetadata, StoreError,
    plausible_original_size,
};

use super::util::{convert_count, from_millis, map_sqlx_error, to_millis};
use super::{SqliteDocStore, TABLE};

const NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

const COLUMNS: &str =
    "key, payload, created_at, ttl_ms, hits, library_id, topic, token_budget, compressed, metadata";

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    payload: Vec<u8>,
    created_at: i64,
    ttl_ms: i64,
    hits: i64,
    library_id: String,
    topic: String,
    token_budget: i64,
    compressed: bool,
    metadata: String,
}

impl TryFrom<EntryRow> for CacheEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            key: row.key.clone(),
            reason: reason.to_string(),
        };

        let created_at =
            from_millis(row.created_at).ok_or_else(|| corrupt("created_at out of range"))?;
        let ttl = u64::try_from(row.ttl_ms)
            .map(Duration::from_millis)
            .map_err(|_| corrupt("negative ttl"))?;
        let hits = u64::try_from(row.hits).map_err(|_| corrupt("negative hit count"))?;
        let token_budget =
            u32::try_from(row.token_budget).map_err(|_| corrupt("token budget out of range"))?;
        let metadata: EntryMetadata = serde_json::from_str(&row.metadata)
            .map_err(|err| corrupt(&format!("unreadable metadata: {err}")))?;
        if row.compressed && metadata.encoding.is_none() {
            return Err(corrupt("compressed row has no encoding"));
        }
        let size_ok = if row.compressed {
            plausible_original_size(row.payload.len(), metadata.original_size)
        } else {
            u64::try_from(row.payload.len()).is_ok_and(|len| len == metadata.original_size)
        };
        if !size_ok {
            return Err(corrupt("original size does not match payload"));
        }

        Ok(Self {
            key: CacheKey::from_stored(row.key),
            payload: Bytes::from(row.payload),
            created_at,
            ttl,
            hits,
            library_id: row.library_id,
            topic: row.topic,
            token_budget,
            compressed: row.compressed,
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScopeRow {
    key: String,
    library_id: String,
    topic: String,
}

#[async_trait]
impl DurableStore for SqliteDocStore {
    async fn get(
        &self,
        key: &CacheKey,
        now: OffsetDateTime,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let sql = format!(
            "UPDATE {TABLE} SET hits = hits + 1, updated_at = {NOW_MS} \
             WHERE key = ?1 AND expires_at >= ?2 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(key.as_str())
            .bind(to_millis(now))
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&entry.metadata).map_err(|err| StoreError::Corrupt {
            key: entry.key.to_string(),
            reason: format!("metadata not serializable: {err}"),
        })?;
        let ttl_ms = i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX);
        let hits = i64::try_from(entry.hits).unwrap_or(i64::MAX);

        let sql = format!(
            "INSERT INTO {TABLE} ({COLUMNS}, expires_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, {NOW_MS}) \
             ON CONFLICT (key) DO UPDATE SET \
                payload = excluded.payload, \
                created_at = excluded.created_at, \
                ttl_ms = excluded.ttl_ms, \
                hits = excluded.hits, \
                library_id = excluded.library_id, \
                topic = excluded.topic, \
                token_budget = excluded.token_budget, \
                compressed = excluded.compressed, \
                metadata = excluded.metadata, \
                expires_at = excluded.expires_at, \
                updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(entry.key.as_str())
            .bind(entry.payload.as_ref())
            .bind(to_millis(entry.created_at))
            .bind(ttl_ms)
            .bind(hits)
            .bind(&entry.library_id)
            .bind(&entry.topic)
            .bind(i64::from(entry.token_budget))
            .bind(entry.compressed)
            .bind(metadata)
            .bind(to_millis(entry.expires_at()))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE key = ?1"))
            .bind(key.as_str())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE expires_at < ?1"))
            .bind(to_millis(now))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_matching(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        let pattern = match filter {
            EntryFilter::Library(library_id) => {
                let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE library_id = ?1"))
                    .bind(library_id)
                    .execute(self.pool())
                    .await
                    .map_err(map_sqlx_error)?;
                return Ok(result.rows_affected());
            }
            EntryFilter::Pattern(pattern) => pattern,
        };

        // Globs are evaluated with the same matcher as the in-process tier;
        // SQL only narrows candidates to the literal library prefix.
        let prefix = pattern.library_prefix();
        let upper = prefix_upper_bound(prefix);
        let mut sql = format!("SELECT key, library_id, topic FROM {TABLE} WHERE library_id >= ?1");
        if upper.is_some() {
            sql.push_str(" AND library_id < ?2");
        }

        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let mut select = sqlx::query_as::<_, ScopeRow>(&sql).bind(prefix);
        if let Some(upper) = &upper {
            select = select.bind(upper);
        }
        let rows = select.fetch_all(&mut *tx).await.map_err(map_sqlx_error)?;

        let keys: Vec<&str> = rows
            .iter()
            .filter(|row| pattern.matches(&row.library_id, &row.topic))
            .map(|row| row.key.as_str())
            .collect();
        if keys.is_empty() {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(0);
        }

        let keys = serde_json::to_string(&keys).map_err(StoreError::unavailable)?;
        let result = sqlx::query(&format!(
            "DELETE FROM {TABLE} WHERE key IN (SELECT value FROM json_each(?1))"
        ))
        .bind(keys)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE}"))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE expires_at >= ?1"
        ))
        .bind(to_millis(now))
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        convert_count(count)
    }

    async fn close(&self) {
        self.pool().close().await;
    }
}

/// Smallest string greater than every string starting with `prefix`.
///
/// `None` when the prefix is empty or cannot be incremented, in which case the
/// scan has no upper bound.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = (u32::from(last) + 1..=u32::from(char::MAX)).find_map(char::from_u32);
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
