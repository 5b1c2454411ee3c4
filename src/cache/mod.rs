//! Cache index mapping capture keys to artifact filenames.
//!
//! Every backend implements [`CacheStore`] with the same contract:
//!
//! - `get` never returns an entry whose age has reached the TTL
//! - `set` is insert-or-replace and stamps the entry with the current time
//! - `sweep_expired` physically removes expired entries and reports them
//!
//! Backends are chosen at startup from [`CacheBackend`]. The in-memory backend
//! loses its entries on restart; the SQLite backend persists them next to the
//! artifacts in the storage root.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

use crate::{CacheBackend, CacheKey, CaptureError, Config};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// File name of the SQLite index inside the storage root.
pub const INDEX_FILE_NAME: &str = "cache-index.sqlite3";

/// A live mapping from key to artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Artifact file name relative to the storage root
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Filename for `key`, or `None` when absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CaptureError>;

    /// Insert or replace the entry for `key`, stamped with the current time.
    async fn set(&self, key: &CacheKey, filename: &str) -> Result<(), CaptureError>;

    async fn remove(&self, key: &CacheKey) -> Result<(), CaptureError>;

    /// Remove every expired entry and return what was removed.
    async fn sweep_expired(&self) -> Result<Vec<CacheEntry>, CaptureError>;

    /// Number of physically stored entries, expired ones included.
    async fn entry_count(&self) -> Result<usize, CaptureError>;

    fn backend(&self) -> CacheBackend;
}

/// Time-to-live policy. A zero TTL never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl(Option<chrono::Duration>);

impl CacheTtl {
    pub fn never() -> Self {
        Self(None)
    }

    pub fn from_days(days: u32) -> Self {
        if days == 0 {
            Self::never()
        } else {
            Self(Some(chrono::Duration::days(i64::from(days))))
        }
    }

    pub fn from_duration(ttl: std::time::Duration) -> Self {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) if ttl > chrono::Duration::zero() => Self(Some(ttl)),
            _ => Self::never(),
        }
    }

    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.0 {
            Some(ttl) => now - created_at >= ttl,
            None => false,
        }
    }

    /// Entries created at or before the cutoff are expired. `None` when nothing
    /// can be expired, including a TTL reaching back past the earliest
    /// representable time.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.0.and_then(|ttl| now.checked_sub_signed(ttl))
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Opens the backend selected by `config.cache_backend`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn CacheStore>, CaptureError> {
    let ttl = CacheTtl::from_days(config.cache_ttl_days);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(ttl, clock)),
        CacheBackend::Sqlite => {
            let path = config.storage_dir.join(INDEX_FILE_NAME);
            Arc::new(SqliteCacheStore::open(&path, ttl, clock).await?)
        }
    };

    tracing::info!(
        "Cache store opened: backend={:?}, ttl_days={}",
        store.backend(),
        config.cache_ttl_days
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry_boundary() {
        let ttl = CacheTtl::from_days(1);
        let created = Utc::now();
        assert!(!ttl.is_expired(created, created));
        assert!(!ttl.is_expired(created, created + chrono::Duration::hours(23)));
        assert!(ttl.is_expired(created, created + chrono::Duration::days(1)));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let ttl = CacheTtl::from_days(0);
        let created = Utc::now();
        assert!(!ttl.is_expired(created, created + chrono::Duration::days(10_000)));
        assert_eq!(ttl.cutoff(created), None);
        assert_eq!(CacheTtl::from_duration(std::time::Duration::ZERO), CacheTtl::never());
    }

    #[test]
    fn test_huge_ttl_has_no_cutoff() {
        let ttl = CacheTtl::from_days(u32::MAX);
        let now = Utc::now();
        assert_eq!(ttl.cutoff(now), None);
        assert!(!ttl.is_expired(now, now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_manual_clock_advances() {
        use crate::testing::ManualClock;

        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(
            clock.now().timestamp_millis(),
            start.timestamp_millis() + 90_000
        );
    }

    #[tokio::test]
    async fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        config.cache_backend = CacheBackend::Memory;
        assert_eq!(open_store(&config).await.unwrap().backend(), CacheBackend::Memory);

        config.cache_backend = CacheBackend::Sqlite;
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend(), CacheBackend::Sqlite);
        assert!(dir.path().join(INDEX_FILE_NAME).exists());
    }
}
