//! Cache Storage Backends
//!
//! Implementations for each backing of an entry store.

mod filesystem;
mod memory;

pub use filesystem::{FilesystemStorage, FilesystemStorageConfig};
pub use memory::MemoryStorage;

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// TierStorage Trait
// =============================================================================

/// Storage operations of a single backing
///
/// Backings hold entries keyed by `K::storage_key()`. They know nothing
/// about policy; the entry store decides which backings are active.
#[async_trait]
pub trait TierStorage<K: CacheKey>: Send + Sync {
    /// Get an entry by key
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<K>>>;

    /// Store an entry, replacing any previous one
    async fn put(&self, entry: CacheEntry<K>) -> Result<()>;

    /// Delete an entry; returns whether anything was removed
    async fn delete(&self, key: &K) -> Result<bool>;

    /// Check if a key exists
    async fn contains(&self, key: &K) -> Result<bool>;

    /// Set the access timestamp of an existing entry
    async fn touch(&self, key: &K, now_ms: i64) -> Result<bool>;

    /// Access timestamp of an entry without reading its payload
    async fn last_seen(&self, key: &K) -> Result<Option<i64>>;

    /// All keys currently held
    async fn keys(&self) -> Result<Vec<K>>;

    /// Number of entries currently held
    async fn entry_count(&self) -> Result<u64>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;
}
