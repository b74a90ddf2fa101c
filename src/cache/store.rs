//! Entry Store
//!
//! A keyed store over the memory and filesystem backings. Which backings are
//! active, whether the store accepts writes at all, and which codec to use
//! are all read from the live policy on every call.
//!
//! Storage failures never leave this module: a failing backing is logged and
//! treated as a miss (reads) or as not stored (writes).

use crate::cache::compression::CompressionManager;
use crate::cache::entry::{is_expired, now_ms, CacheEntry};
use crate::cache::key::CacheKey;
use crate::cache::storage::{FilesystemStorage, FilesystemStorageConfig, MemoryStorage, TierStorage};
use crate::cache::tier::Backing;
use crate::config::CachePolicy;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Generated GIFs
    Result,
    /// Fetched avatars
    Source,
}

impl StoreKind {
    /// Subdirectory under the cache root
    pub fn directory(&self) -> &'static str {
        match self {
            StoreKind::Result => "gif",
            StoreKind::Source => "avatar",
        }
    }

    /// Payload file extension
    pub fn extension(&self) -> &'static str {
        match self {
            StoreKind::Result => "gif",
            StoreKind::Source => "png",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Result => write!(f, "result"),
            StoreKind::Source => write!(f, "source"),
        }
    }
}

/// Entry counts per backing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub memory: u64,
    pub filesystem: u64,
}

impl TierCounts {
    pub fn total(&self) -> u64 {
        self.memory + self.filesystem
    }
}

// =============================================================================
// Entry Store
// =============================================================================

/// Policy-driven store of one kind of entry
pub struct EntryStore<K: CacheKey> {
    kind: StoreKind,
    memory: MemoryStorage<K>,
    filesystem: FilesystemStorage<K>,
    compression: CompressionManager,
    policy: Arc<dyn CachePolicy>,
}

impl<K: CacheKey> EntryStore<K> {
    /// Create a store whose filesystem backing lives under `cache_root`
    pub fn new(kind: StoreKind, cache_root: &Path, policy: Arc<dyn CachePolicy>) -> Self {
        Self {
            kind,
            memory: MemoryStorage::new(),
            filesystem: FilesystemStorage::new(FilesystemStorageConfig::new(
                cache_root.join(kind.directory()),
                kind.extension(),
            )),
            compression: CompressionManager::new(),
            policy,
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Whether the store takes part in caching under the current policy
    pub fn is_enabled(&self) -> bool {
        self.policy.enabled() && (self.kind == StoreKind::Result || self.policy.avatars())
    }

    fn storage(&self, backing: Backing) -> &dyn TierStorage<K> {
        match backing {
            Backing::Memory => &self.memory,
            Backing::Filesystem => &self.filesystem,
        }
    }

    fn active(&self) -> impl Iterator<Item = Backing> {
        self.policy.cache_type().active_backings()
    }

    /// Check presence in any active backing
    pub async fn has(&self, key: &K) -> bool {
        if !self.is_enabled() {
            return false;
        }
        for backing in self.active() {
            match self.storage(backing).contains(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!(kind = %self.kind, key = %key, tier = %backing, "Cache lookup failed: {}", e),
            }
        }
        false
    }

    /// Read a payload, memory first; refreshes the serving backing's access time
    pub async fn get(&self, key: &K) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        for backing in self.active() {
            let storage = self.storage(backing);
            let entry = match storage.get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(kind = %self.kind, key = %key, tier = %backing, "Cache read failed: {}", e);
                    continue;
                }
            };

            let bytes = match self.compression.decode(&entry.data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(kind = %self.kind, key = %key, tier = %backing, "Cached payload unreadable: {}", e);
                    continue;
                }
            };

            if let Err(e) = storage.touch(key, now_ms()).await {
                warn!(kind = %self.kind, key = %key, tier = %backing, "Failed to refresh access time: {}", e);
            }
            debug!(kind = %self.kind, key = %key, tier = %backing, "Cache hit");
            return Some(bytes);
        }
        None
    }

    /// Store a payload in every active backing
    ///
    /// Returns `false` when the store is disabled or no backing accepted it.
    pub async fn put(&self, key: &K, bytes: Bytes) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let data = self.compression.encode(bytes, self.policy.compression());
        let entry = CacheEntry::new(key.clone(), data);

        let mut stored = false;
        for backing in self.active() {
            match self.storage(backing).put(entry.clone()).await {
                Ok(()) => stored = true,
                Err(e) => warn!(kind = %self.kind, key = %key, tier = %backing, "Cache write failed: {}", e),
            }
        }
        stored
    }

    /// Remove a key from every active backing; idempotent
    pub async fn remove(&self, key: &K) -> bool {
        let mut removed = false;
        for backing in self.active() {
            match self.storage(backing).delete(key).await {
                Ok(found) => removed |= found,
                Err(e) => warn!(kind = %self.kind, key = %key, tier = %backing, "Cache delete failed: {}", e),
            }
        }
        removed
    }

    /// Union of keys held by the active backings
    pub async fn list_keys(&self) -> Vec<K> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for backing in self.active() {
            match self.storage(backing).keys().await {
                Ok(found) => {
                    for key in found {
                        if seen.insert(key.clone()) {
                            keys.push(key);
                        }
                    }
                }
                Err(e) => warn!(kind = %self.kind, tier = %backing, "Cache listing failed: {}", e),
            }
        }
        keys
    }

    /// Check the TTL rule against the first active backing holding the key
    ///
    /// Never true while the policy is permanent, and false for unknown keys.
    pub async fn check_expired(&self, key: &K, now_ms: i64) -> bool {
        if self.policy.permanent() {
            return false;
        }
        let ttl = self.policy.cache_time_ms();
        for backing in self.active() {
            match self.storage(backing).last_seen(key).await {
                Ok(Some(last_seen)) => return is_expired(last_seen, now_ms, ttl),
                Ok(None) => {}
                Err(e) => warn!(kind = %self.kind, key = %key, tier = %backing, "Cache metadata read failed: {}", e),
            }
        }
        false
    }

    /// Drop every entry in both backings, active or not
    ///
    /// Returns the number of distinct keys removed.
    pub async fn clear(&self) -> usize {
        let mut keys = HashSet::new();
        for backing in Backing::lookup_order() {
            let storage = self.storage(*backing);
            match storage.keys().await {
                Ok(found) => keys.extend(found),
                Err(e) => warn!(kind = %self.kind, tier = %backing, "Cache listing failed: {}", e),
            }
            if let Err(e) = storage.clear().await {
                warn!(kind = %self.kind, tier = %backing, "Cache clear failed: {}", e);
            }
        }
        keys.len()
    }

    /// Entry counts of the active backings (inactive ones report zero)
    pub async fn counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for backing in self.active() {
            let count = match self.storage(backing).entry_count().await {
                Ok(count) => count,
                Err(e) => {
                    warn!(kind = %self.kind, tier = %backing, "Cache count failed: {}", e);
                    0
                }
            };
            match backing {
                Backing::Memory => counts.memory = count,
                Backing::Filesystem => counts.filesystem = count,
            }
        }
        counts
    }

    /// Bytes held in memory
    pub fn memory_bytes(&self) -> u64 {
        self.memory.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CompressionAlgorithm;
    use crate::cache::key::{PetPetParams, ResultKey, SourceKey};
    use crate::cache::tier::CacheType;
    use crate::config::{CacheSettings, PolicyHandle};
    use tempfile::TempDir;

    fn result_store(dir: &TempDir, settings: CacheSettings) -> (EntryStore<ResultKey>, PolicyHandle) {
        let policy = PolicyHandle::new(settings);
        let store = EntryStore::new(StoreKind::Result, dir.path(), Arc::new(policy.clone()));
        (store, policy)
    }

    fn key(id: &str) -> ResultKey {
        ResultKey::new(id, &PetPetParams::default())
    }

    #[tokio::test]
    async fn test_put_get_memory() {
        let dir = TempDir::new().unwrap();
        let (store, _) = result_store(&dir, CacheSettings::default());

        assert!(!store.has(&key("1")).await);
        assert!(store.put(&key("1"), Bytes::from_static(b"GIF89a")).await);
        assert!(store.has(&key("1")).await);
        assert_eq!(store.get(&key("1")).await.unwrap().as_ref(), b"GIF89a");
        assert_eq!(store.memory_bytes(), 6);

        // memory only under the default cache type
        assert!(!dir.path().join("gif").exists());
    }

    #[tokio::test]
    async fn test_disabled_store_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let (store, policy) = result_store(&dir, CacheSettings::default());

        policy.update(|s| s.enabled = false);
        assert!(!store.put(&key("1"), Bytes::from_static(b"a")).await);
        assert!(store.get(&key("1")).await.is_none());

        policy.update(|s| s.enabled = true);
        assert!(!store.has(&key("1")).await);
    }

    #[tokio::test]
    async fn test_source_store_follows_avatar_toggle() {
        let dir = TempDir::new().unwrap();
        let policy = PolicyHandle::new(CacheSettings {
            avatars: false,
            ..Default::default()
        });
        let sources: EntryStore<SourceKey> =
            EntryStore::new(StoreKind::Source, dir.path(), Arc::new(policy.clone()));
        let results: EntryStore<ResultKey> =
            EntryStore::new(StoreKind::Result, dir.path(), Arc::new(policy));

        assert!(!sources.put(&SourceKey::new("1", None), Bytes::from_static(b"png")).await);
        assert!(results.put(&key("1"), Bytes::from_static(b"gif")).await);
    }

    #[tokio::test]
    async fn test_both_writes_each_backing() {
        let dir = TempDir::new().unwrap();
        let (store, policy) = result_store(
            &dir,
            CacheSettings {
                cache_type: CacheType::Both,
                ..Default::default()
            },
        );

        assert!(store.put(&key("1"), Bytes::from_static(b"GIF89a")).await);
        assert_eq!(store.counts().await, TierCounts { memory: 1, filesystem: 1 });

        // filesystem copy serves once memory is out of the picture
        policy.update(|s| s.cache_type = CacheType::Fs);
        assert_eq!(store.get(&key("1")).await.unwrap().as_ref(), b"GIF89a");

        policy.update(|s| s.cache_type = CacheType::Both);
        assert!(store.remove(&key("1")).await);
        assert!(!store.remove(&key("1")).await);
        assert_eq!(store.counts().await.total(), 0);
    }

    #[tokio::test]
    async fn test_list_keys_is_union() {
        let dir = TempDir::new().unwrap();
        let (store, policy) = result_store(
            &dir,
            CacheSettings {
                cache_type: CacheType::Fs,
                ..Default::default()
            },
        );
        store.put(&key("1"), Bytes::from_static(b"a")).await;

        policy.update(|s| s.cache_type = CacheType::Code);
        store.put(&key("2"), Bytes::from_static(b"b")).await;

        policy.update(|s| s.cache_type = CacheType::Both);
        let mut keys: Vec<String> = store.list_keys().await.iter().map(|k| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec![key("1").to_string(), key("2").to_string()]);
    }

    #[tokio::test]
    async fn test_check_expired() {
        let dir = TempDir::new().unwrap();
        let (store, policy) = result_store(
            &dir,
            CacheSettings {
                cache_time: 1_000,
                ..Default::default()
            },
        );
        let k = key("1");
        let before = now_ms();
        store.put(&k, Bytes::from_static(b"a")).await;

        assert!(!store.check_expired(&k, before).await);
        assert!(store.check_expired(&k, now_ms() + 1_000).await);
        assert!(!store.check_expired(&key("2"), now_ms() + 1_000_000).await);

        policy.update(|s| s.permanent = true);
        assert!(!store.check_expired(&k, now_ms() + 1_000_000).await);
    }

    #[tokio::test]
    async fn test_compressed_at_rest() {
        let dir = TempDir::new().unwrap();
        let (store, _) = result_store(
            &dir,
            CacheSettings {
                cache_type: CacheType::Fs,
                compression: CompressionAlgorithm::Zstd,
                ..Default::default()
            },
        );
        let payload = Bytes::from(vec![7u8; 4096]);

        store.put(&key("1"), payload.clone()).await;

        let on_disk = std::fs::read(dir.path().join("gif").join(format!("{}.gif", key("1")))).unwrap();
        assert!(on_disk.len() < payload.len());
        assert_eq!(store.get(&key("1")).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_clear_counts_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let (store, _) = result_store(
            &dir,
            CacheSettings {
                cache_type: CacheType::Both,
                ..Default::default()
            },
        );
        store.put(&key("1"), Bytes::from_static(b"a")).await;
        store.put(&key("2"), Bytes::from_static(b"b")).await;

        assert_eq!(store.clear().await, 2);
        assert!(store.list_keys().await.is_empty());
    }
}
