//! SQLite-backed cache index.
//!
//! Database operations run on the tokio-rusqlite background thread. Timestamps
//! are stored as Unix milliseconds so expiry can be compared in SQL.

use super::{CacheEntry, CacheStore, CacheTtl, Clock};
use crate::{CacheBackend, CacheKey, CaptureError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_rusqlite::{params, rusqlite, Connection};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS capture_cache (
        cache_key TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_capture_cache_created_at
        ON capture_cache (created_at);";

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

pub struct SqliteCacheStore {
    conn: Connection,
    ttl: CacheTtl,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    /// Opens (or creates) the index at `path` and applies the schema.
    pub async fn open(
        path: impl AsRef<Path>,
        ttl: CacheTtl,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CaptureError> {
        let conn = Connection::open(path).await?;
        Self::init(conn, ttl, clock).await
    }

    pub async fn open_in_memory(ttl: CacheTtl, clock: Arc<dyn Clock>) -> Result<Self, CaptureError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, ttl, clock).await
    }

    async fn init(conn: Connection, ttl: CacheTtl, clock: Arc<dyn Clock>) -> Result<Self, CaptureError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(PRAGMAS)?;
            conn.execute_batch(SCHEMA)
        })
        .await?;

        Ok(Self { conn, ttl, clock })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CaptureError> {
        let key = key.as_str().to_string();
        let row = self
            .conn
            .call({
                let key = key.clone();
                move |conn| -> Result<Option<(String, i64)>, rusqlite::Error> {
                    let result = conn.query_row(
                        "SELECT filename, created_at FROM capture_cache WHERE cache_key = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    );
                    match result {
                        Ok(found) => Ok(Some(found)),
                        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        let Some((filename, created_at)) = row else {
            return Ok(None);
        };

        if !self.ttl.is_expired(from_millis(created_at), self.clock.now()) {
            return Ok(Some(filename));
        }

        // Matching on created_at leaves a concurrently refreshed row alone.
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "DELETE FROM capture_cache WHERE cache_key = ?1 AND created_at = ?2",
                    params![key, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, filename: &str) -> Result<(), CaptureError> {
        let key = key.as_str().to_string();
        let filename = filename.to_string();
        let created_at = self.clock.now().timestamp_millis();

        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO capture_cache (cache_key, filename, created_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(cache_key) DO UPDATE SET
                        filename = excluded.filename,
                        created_at = excluded.created_at",
                    params![key, filename, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CaptureError> {
        let key = key.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM capture_cache WHERE cache_key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<Vec<CacheEntry>, CaptureError> {
        let Some(cutoff) = self.ttl.cutoff(self.clock.now()) else {
            return Ok(Vec::new());
        };
        let cutoff = cutoff.timestamp_millis();

        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(String, String, i64)>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let rows = {
                    let mut stmt = tx.prepare(
                        "SELECT cache_key, filename, created_at FROM capture_cache
                        WHERE created_at <= ?1",
                    )?;
                    let mapped = stmt.query_map(params![cutoff], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                };
                tx.execute(
                    "DELETE FROM capture_cache WHERE created_at <= ?1",
                    params![cutoff],
                )?;
                tx.commit()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(key, filename, created_at)| CacheEntry {
                key: CacheKey::from_stored(key),
                filename,
                created_at: from_millis(created_at),
            })
            .collect())
    }

    async fn entry_count(&self) -> Result<usize, CaptureError> {
        let count = self
            .conn
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT COUNT(*) FROM capture_cache", [], |row| row.get(0))
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn backend(&self) -> CacheBackend {
        CacheBackend::Sqlite
    }
}
