use super::{CacheEntry, CacheStore, CacheTtl, Clock};
use crate::{CacheBackend, CacheKey, CaptureError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local cache index. Entries do not survive a restart.
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: CacheTtl,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(ttl: CacheTtl, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl.is_expired(entry.created_at, self.clock.now())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CaptureError> {
        if let Some(entry) = self.entries.get(key) {
            if !self.is_expired(&entry) {
                return Ok(Some(entry.filename.clone()));
            }
        } else {
            return Ok(None);
        }

        // Re-checked under the shard lock so a concurrent `set` is not lost.
        self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, filename: &str) -> Result<(), CaptureError> {
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                filename: filename.to_string(),
                created_at: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CaptureError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<Vec<CacheEntry>, CaptureError> {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| self.is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(expired
            .iter()
            .filter_map(|key| self.entries.remove_if(key, |_, entry| self.is_expired(entry)))
            .map(|(_, entry)| entry)
            .collect())
    }

    async fn entry_count(&self) -> Result<usize, CaptureError> {
        Ok(self.entries.len())
    }

    fn backend(&self) -> CacheBackend {
        CacheBackend::Memory
    }
}
