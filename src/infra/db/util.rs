use time::OffsetDateTime;

use crate::cache::StoreError;

pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::unavailable("durable store is closed"),
        sqlx::Error::PoolTimedOut => {
            StoreError::unavailable("timed out waiting for a database connection")
        }
        sqlx::Error::Database(db) if db.message().contains("locked") => {
            StoreError::unavailable(format!("database busy: {}", db.message()))
        }
        other => StoreError::unavailable(other),
    }
}

/// Milliseconds since the Unix epoch, saturating at the `i64` range.
pub(super) fn to_millis(at: OffsetDateTime) -> i64 {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
}

pub(super) fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

pub(super) fn convert_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::unavailable("count exceeds supported range"))
}
