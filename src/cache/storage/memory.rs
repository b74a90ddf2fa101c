//! In-Memory Storage
//!
//! In-process backing using DashMap for concurrent access.

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::storage::TierStorage;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory backing keyed by storage key
pub struct MemoryStorage<K> {
    entries: DashMap<String, CacheEntry<K>>,
    /// Current total stored size in bytes
    size_bytes: AtomicU64,
}

impl<K: CacheKey> MemoryStorage<K> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            size_bytes: AtomicU64::new(0),
        }
    }

    /// Total stored bytes across entries
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: CacheKey> Default for MemoryStorage<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey> TierStorage<K> for MemoryStorage<K> {
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<K>>> {
        Ok(self
            .entries
            .get(&key.storage_key())
            .map(|r| r.value().clone()))
    }

    async fn put(&self, entry: CacheEntry<K>) -> Result<()> {
        let new_size = entry.data.stored_size();
        let previous = self.entries.insert(entry.key.storage_key(), entry);

        let old_size = previous.map(|e| e.data.stored_size()).unwrap_or(0);
        if new_size >= old_size {
            self.size_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.size_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<bool> {
        match self.entries.remove(&key.storage_key()) {
            Some((_, entry)) => {
                self.size_bytes
                    .fetch_sub(entry.data.stored_size(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.entries.contains_key(&key.storage_key()))
    }

    async fn touch(&self, key: &K, now_ms: i64) -> Result<bool> {
        match self.entries.get_mut(&key.storage_key()) {
            Some(mut entry) => {
                entry.touch(now_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn last_seen(&self, key: &K) -> Result<Option<i64>> {
        Ok(self.entries.get(&key.storage_key()).map(|e| e.last_seen))
    }

    async fn keys(&self) -> Result<Vec<K>> {
        Ok(self.entries.iter().map(|r| r.value().key.clone()).collect())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::SourceKey;
    use crate::cache::storage::test_support::source_entry;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        let key = SourceKey::new("42", None);

        storage.put(source_entry("42", b"avatar", 10)).await.unwrap();
        assert!(storage.contains(&key).await.unwrap());

        let entry = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.data.bytes.as_ref(), b"avatar");
        assert_eq!(entry.last_seen, 10);
        assert_eq!(storage.size_bytes(), 6);

        assert!(storage.delete(&key).await.unwrap());
        assert!(!storage.delete(&key).await.unwrap());
        assert!(storage.get(&key).await.unwrap().is_none());
        assert_eq!(storage.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_replace_adjusts_size() {
        let storage = MemoryStorage::new();

        storage.put(source_entry("1", b"0123456789", 0)).await.unwrap();
        storage.put(source_entry("1", b"0123", 0)).await.unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.size_bytes(), 4);
    }

    #[tokio::test]
    async fn test_touch_updates_last_seen() {
        let storage = MemoryStorage::new();
        let key = SourceKey::new("7", None);

        assert!(!storage.touch(&key, 50).await.unwrap());

        storage.put(source_entry("7", b"x", 0)).await.unwrap();
        assert!(storage.touch(&key, 50).await.unwrap());
        assert_eq!(storage.last_seen(&key).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_keys_and_clear() {
        let storage = MemoryStorage::new();
        storage.put(source_entry("1", b"a", 0)).await.unwrap();
        storage.put(source_entry("2", b"b", 0)).await.unwrap();

        let mut keys: Vec<String> = storage
            .keys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.storage_key())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["1", "2"]);

        storage.clear().await.unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.entry_count().await.unwrap(), 0);
    }
}
