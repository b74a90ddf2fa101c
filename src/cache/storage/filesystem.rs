//! Filesystem Storage
//!
//! Each entry is a payload file `<key>.<ext>` with a JSON metadata file
//! `<key>.json` next to it. There is no in-memory index; the directory is
//! the source of truth so entries survive restarts.
//!
//! A payload file starts with a small header naming its codec and original
//! size, so one atomic rename publishes everything needed to decode it. The
//! metadata file only carries the access time.

use crate::cache::entry::{CacheData, CacheEntry, CompressionAlgorithm, StoredMetadata};
use crate::cache::key::CacheKey;
use crate::cache::storage::TierStorage;
use crate::error::Result;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;

const METADATA_EXTENSION: &str = "json";

/// Prefix of temporary write files' extensions
const TMP_EXTENSION_PREFIX: &str = "tmp";

/// Temporary files untouched for this long were left by an interrupted write
const STALE_TMP_AGE: Duration = Duration::from_secs(60);

const PAYLOAD_MAGIC: &[u8; 4] = b"PPC1";

/// Magic, codec tag, original size (u64 LE)
const PAYLOAD_HEADER_LEN: usize = PAYLOAD_MAGIC.len() + 1 + 8;

fn encode_payload(data: &CacheData) -> Bytes {
    let mut buf = BytesMut::with_capacity(PAYLOAD_HEADER_LEN + data.bytes.len());
    buf.put_slice(PAYLOAD_MAGIC);
    buf.put_u8(data.algorithm.tag());
    buf.put_u64_le(data.original_size);
    buf.put_slice(&data.bytes);
    buf.freeze()
}

/// Split a payload file into its data; `None` if the header is missing or unknown
fn decode_payload(mut raw: Bytes) -> Option<CacheData> {
    if raw.len() < PAYLOAD_HEADER_LEN || !raw.starts_with(PAYLOAD_MAGIC) {
        return None;
    }
    raw.advance(PAYLOAD_MAGIC.len());
    let algorithm = CompressionAlgorithm::from_tag(raw.get_u8())?;
    let original_size = raw.get_u64_le();
    Some(CacheData::encoded(raw, original_size, algorithm))
}

// =============================================================================
// Filesystem Storage Configuration
// =============================================================================

/// Configuration for a filesystem backing
#[derive(Debug, Clone)]
pub struct FilesystemStorageConfig {
    /// Directory holding this store's files
    pub root_path: PathBuf,
    /// Payload file extension (without dot)
    pub extension: &'static str,
}

impl FilesystemStorageConfig {
    pub fn new(root_path: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            root_path: root_path.into(),
            extension,
        }
    }
}

// =============================================================================
// Filesystem Storage
// =============================================================================

/// Filesystem backing of an entry store
pub struct FilesystemStorage<K> {
    root_path: PathBuf,
    extension: &'static str,
    /// Suffix source for temporary write files
    write_seq: AtomicU64,
    _key: PhantomData<fn() -> K>,
}

impl<K: CacheKey> FilesystemStorage<K> {
    /// Create the backing; the directory is created on first write
    pub fn new(config: FilesystemStorageConfig) -> Self {
        Self {
            root_path: config.root_path,
            extension: config.extension,
            write_seq: AtomicU64::new(0),
            _key: PhantomData,
        }
    }

    fn payload_path(&self, key: &K) -> PathBuf {
        self.root_path
            .join(format!("{}.{}", key.storage_key(), self.extension))
    }

    fn metadata_path(&self, key: &K) -> PathBuf {
        self.root_path
            .join(format!("{}.{}", key.storage_key(), METADATA_EXTENSION))
    }

    /// Read metadata; a missing or unreadable record yields `None`
    async fn read_metadata(&self, key: &K) -> Option<StoredMetadata> {
        let json = fs::read_to_string(self.metadata_path(key)).await.ok()?;
        match serde_json::from_str(&json) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!(key = %key, "Ignoring corrupt cache metadata: {}", e);
                None
            }
        }
    }

    /// Write through a temporary file so readers never see partial data
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}{}", TMP_EXTENSION_PREFIX, seq));
        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_metadata(&self, key: &K, meta: &StoredMetadata) -> Result<()> {
        let json = serde_json::to_vec(meta)?;
        self.write_atomic(&self.metadata_path(key), &json).await
    }

    /// Delete a temporary file an interrupted write left behind
    async fn remove_if_stale(&self, path: &Path) {
        let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < STALE_TMP_AGE {
            return;
        }
        match fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale temporary file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove stale temporary file: {}", e),
        }
    }
}

/// Remove a file, treating absence as success; returns whether it existed
async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl<K: CacheKey> TierStorage<K> for FilesystemStorage<K> {
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<K>>> {
        let raw = match fs::read(self.payload_path(key)).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(data) = decode_payload(raw) else {
            tracing::debug!(key = %key, "Ignoring cache payload without a valid header");
            return Ok(None);
        };

        let last_seen = self.read_metadata(key).await.map_or(0, |meta| meta.last_seen);
        Ok(Some(CacheEntry::with_last_seen(key.clone(), data, last_seen)))
    }

    async fn put(&self, entry: CacheEntry<K>) -> Result<()> {
        fs::create_dir_all(&self.root_path).await?;
        self.write_atomic(&self.payload_path(&entry.key), &encode_payload(&entry.data))
            .await?;
        self.write_metadata(&entry.key, &entry.metadata()).await
    }

    async fn delete(&self, key: &K) -> Result<bool> {
        let existed = remove_if_exists(&self.payload_path(key)).await?;
        remove_if_exists(&self.metadata_path(key)).await?;
        Ok(existed)
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        Ok(fs::try_exists(self.payload_path(key)).await?)
    }

    async fn touch(&self, key: &K, now_ms: i64) -> Result<bool> {
        if !self.contains(key).await? {
            return Ok(false);
        }
        let meta = StoredMetadata {
            id: key.source_id().to_string(),
            key: key.storage_key(),
            last_seen: now_ms,
        };
        self.write_metadata(key, &meta).await?;
        Ok(true)
    }

    async fn last_seen(&self, key: &K) -> Result<Option<i64>> {
        if let Some(meta) = self.read_metadata(key).await {
            return Ok(Some(meta.last_seen));
        }
        // Payload without metadata is an entry that was never seen
        Ok(self.contains(key).await?.then_some(0))
    }

    async fn keys(&self) -> Result<Vec<K>> {
        let mut dir = match fs::read_dir(&self.root_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let extension = path.extension().and_then(|e| e.to_str());
            if extension.is_some_and(|e| e.starts_with(TMP_EXTENSION_PREFIX)) {
                self.remove_if_stale(&path).await;
                continue;
            }
            if extension != Some(self.extension) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(K::from_storage_key)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.keys().await?.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{PetPetParams, ResultKey, SourceKey};
    use crate::cache::storage::test_support::source_entry;
    use tempfile::TempDir;

    fn storage<K: CacheKey>(dir: &TempDir, ext: &'static str) -> FilesystemStorage<K> {
        FilesystemStorage::new(FilesystemStorageConfig::new(dir.path().join(ext), ext))
    }

    #[tokio::test]
    async fn test_put_writes_payload_and_metadata() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");

        storage.put(source_entry("42", b"avatar", 1234)).await.unwrap();

        let raw = std::fs::read(dir.path().join("png/42.png")).unwrap();
        assert!(raw.starts_with(PAYLOAD_MAGIC));
        let data = decode_payload(Bytes::from(raw)).unwrap();
        assert_eq!(data.bytes.as_ref(), b"avatar");
        assert_eq!(data.algorithm, CompressionAlgorithm::None);
        assert_eq!(data.original_size, 6);

        let meta: StoredMetadata =
            serde_json::from_slice(&std::fs::read(dir.path().join("png/42.json")).unwrap()).unwrap();
        assert_eq!(meta.id, "42");
        assert_eq!(meta.last_seen, 1234);
    }

    #[tokio::test]
    async fn test_get_restores_entry() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        let key = SourceKey::new("42", None);

        assert!(storage.get(&key).await.unwrap().is_none());

        storage.put(source_entry("42", b"avatar", 99)).await.unwrap();
        let entry = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.data.bytes.as_ref(), b"avatar");
        assert_eq!(entry.last_seen, 99);
    }

    #[tokio::test]
    async fn test_missing_metadata_counts_as_unseen() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        let key = SourceKey::new("5", None);

        std::fs::create_dir_all(dir.path().join("png")).unwrap();
        std::fs::write(dir.path().join("png/5.png"), b"orphan").unwrap();

        assert_eq!(storage.last_seen(&key).await.unwrap(), Some(0));
        assert!(storage.get(&key).await.unwrap().is_none());
        assert!(storage.contains(&key).await.unwrap());

        assert!(storage.touch(&key, 777).await.unwrap());
        assert_eq!(storage.last_seen(&key).await.unwrap(), Some(777));
    }

    #[tokio::test]
    async fn test_corrupt_metadata_only_loses_access_time() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        let key = SourceKey::new("9", None);

        storage.put(source_entry("9", b"avatar", 50)).await.unwrap();
        std::fs::write(dir.path().join("png/9.json"), b"{not json").unwrap();

        let entry = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.data.bytes.as_ref(), b"avatar");
        assert_eq!(entry.last_seen, 0);
        assert_eq!(storage.last_seen(&key).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_codec_comes_from_payload_not_metadata() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<ResultKey> = storage(&dir, "gif");
        let key = ResultKey::new("42", &PetPetParams::default());
        let plain = Bytes::from(b"GIF89a".repeat(100));

        storage
            .put(CacheEntry::with_last_seen(key.clone(), CacheData::uncompressed(plain.clone()), 1))
            .await
            .unwrap();
        let old_sidecar = std::fs::read(dir.path().join("gif/42_0x0_0x0_12_100_128_16_both.json")).unwrap();

        let packed = Bytes::from(zstd::encode_all(plain.as_ref(), 3).unwrap());
        storage
            .put(CacheEntry::with_last_seen(
                key.clone(),
                CacheData::encoded(packed.clone(), plain.len() as u64, CompressionAlgorithm::Zstd),
                2,
            ))
            .await
            .unwrap();
        // a reader racing the second write sees the new payload with the old sidecar
        std::fs::write(dir.path().join("gif/42_0x0_0x0_12_100_128_16_both.json"), old_sidecar).unwrap();

        let entry = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.data.algorithm, CompressionAlgorithm::Zstd);
        assert_eq!(entry.data.original_size, plain.len() as u64);
        assert_eq!(entry.data.bytes, packed);
        assert_eq!(entry.last_seen, 1);
    }

    #[tokio::test]
    async fn test_unknown_codec_tag_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        let key = SourceKey::new("7", None);

        let mut raw = PAYLOAD_MAGIC.to_vec();
        raw.push(200);
        raw.extend_from_slice(&3u64.to_le_bytes());
        raw.extend_from_slice(b"png");
        std::fs::create_dir_all(dir.path().join("png")).unwrap();
        std::fs::write(dir.path().join("png/7.png"), raw).unwrap();

        assert!(storage.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_sweep_stale_temporary_files() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        storage.put(source_entry("1", b"a", 0)).await.unwrap();

        let stale = dir.path().join("png/2.tmp0");
        let fresh = dir.path().join("png/3.tmp1");
        std::fs::write(&stale, b"half").unwrap();
        std::fs::write(&fresh, b"half").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec![SourceKey::new("1", None)]);
        assert!(!stale.exists());
        // may still belong to a write in progress
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_delete_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");
        let key = SourceKey::new("42", None);

        storage.put(source_entry("42", b"avatar", 0)).await.unwrap();
        assert!(storage.delete(&key).await.unwrap());
        assert!(!dir.path().join("png/42.png").exists());
        assert!(!dir.path().join("png/42.json").exists());
        assert!(!storage.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_parse_file_names() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<ResultKey> = storage(&dir, "gif");

        assert!(storage.keys().await.unwrap().is_empty());

        let key = ResultKey::new("117378255429959680", &PetPetParams::default());
        storage
            .put(CacheEntry::new(
                key.clone(),
                CacheData::uncompressed(Bytes::from_static(b"GIF89a")),
            ))
            .await
            .unwrap();
        // foreign files are ignored
        std::fs::write(dir.path().join("gif/notes.gif"), b"?").unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec![key]);
        assert_eq!(storage.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_directory() {
        let dir = TempDir::new().unwrap();
        let storage: FilesystemStorage<SourceKey> = storage(&dir, "png");

        storage.clear().await.unwrap();
        storage.put(source_entry("1", b"a", 0)).await.unwrap();
        storage.clear().await.unwrap();

        assert!(storage.keys().await.unwrap().is_empty());
        storage.put(source_entry("2", b"b", 0)).await.unwrap();
        assert!(storage.contains(&SourceKey::new("2", None)).await.unwrap());
    }
}
