//! SQLite-backed durable tier.

mod entries;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    query,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    },
};
use tracing::info;

use crate::cache::{DurableConfig, JournalMode, Synchronous};

use super::error::InfraError;

const TABLE: &str = "doc_cache_entries";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS doc_cache_entries (
        key TEXT PRIMARY KEY NOT NULL,
        payload BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        ttl_ms INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        hits INTEGER NOT NULL DEFAULT 0,
        library_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        token_budget INTEGER NOT NULL,
        compressed INTEGER NOT NULL DEFAULT 0,
        metadata TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS doc_cache_entries_expires_at_idx
        ON doc_cache_entries (expires_at)",
    "CREATE INDEX IF NOT EXISTS doc_cache_entries_library_topic_idx
        ON doc_cache_entries (library_id, topic)",
];

/// Durable store over a single SQLite file.
#[derive(Clone)]
pub struct SqliteDocStore {
    pool: Arc<SqlitePool>,
}

impl SqliteDocStore {
    /// Open (creating if missing) the database at `config.path` and make sure
    /// the schema exists.
    pub async fn open(config: &DurableConfig) -> Result<Self, InfraError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(journal_mode(config.journal_mode))
            .synchronous(synchronous(config.synchronous))
            .page_size(config.page_size)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|source| InfraError::database(&config.path, source))?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store
            .ensure_schema()
            .await
            .map_err(|source| InfraError::database(&config.path, source))?;

        info!(
            path = %config.path.display(),
            journal_mode = ?config.journal_mode,
            "Durable cache opened"
        );

        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            query(statement).execute(self.pool()).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

fn journal_mode(mode: JournalMode) -> SqliteJournalMode {
    match mode {
        JournalMode::Delete => SqliteJournalMode::Delete,
        JournalMode::Truncate => SqliteJournalMode::Truncate,
        JournalMode::Persist => SqliteJournalMode::Persist,
        JournalMode::Memory => SqliteJournalMode::Memory,
        JournalMode::Wal => SqliteJournalMode::Wal,
        JournalMode::Off => SqliteJournalMode::Off,
    }
}

fn synchronous(level: Synchronous) -> SqliteSynchronous {
    match level {
        Synchronous::Off => SqliteSynchronous::Off,
        Synchronous::Normal => SqliteSynchronous::Normal,
        Synchronous::Full => SqliteSynchronous::Full,
        Synchronous::Extra => SqliteSynchronous::Extra,
    }
}
