//! Cache Entry Types
//!
//! Defines stored entries, their payload container, and the on-disk
//! metadata record.

use crate::cache::key::CacheKey;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Current wall clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Cache Data
// =============================================================================

/// Payload as held by a backing
#[derive(Debug, Clone)]
pub struct CacheData {
    /// Stored bytes (compressed if `algorithm` is not `None`)
    pub bytes: Bytes,
    /// Size before compression
    pub original_size: u64,
    /// Codec applied to `bytes`
    pub algorithm: CompressionAlgorithm,
}

impl CacheData {
    /// Create uncompressed cache data
    pub fn uncompressed(bytes: Bytes) -> Self {
        let size = bytes.len() as u64;
        Self {
            bytes,
            original_size: size,
            algorithm: CompressionAlgorithm::None,
        }
    }

    /// Create data already encoded with `algorithm`
    pub fn encoded(bytes: Bytes, original_size: u64, algorithm: CompressionAlgorithm) -> Self {
        Self {
            bytes,
            original_size,
            algorithm,
        }
    }

    /// Stored size (compressed size if compressed)
    pub fn stored_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_compressed(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }
}

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

impl CompressionAlgorithm {
    /// Single-byte identifier used in on-disk payload headers
    pub fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Zstd => 2,
            CompressionAlgorithm::Snappy => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            2 => Some(CompressionAlgorithm::Zstd),
            3 => Some(CompressionAlgorithm::Snappy),
            _ => None,
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            "snappy" => Ok(CompressionAlgorithm::Snappy),
            other => Err(format!("unknown compression algorithm '{}'", other)),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached payload with its access timestamp
#[derive(Debug, Clone)]
pub struct CacheEntry<K> {
    pub key: K,
    pub data: Arc<CacheData>,
    /// Epoch milliseconds of the last write or successful read
    pub last_seen: i64,
}

impl<K: CacheKey> CacheEntry<K> {
    /// Create an entry stamped with the current time
    pub fn new(key: K, data: CacheData) -> Self {
        Self::with_last_seen(key, data, now_ms())
    }

    pub fn with_last_seen(key: K, data: CacheData, last_seen: i64) -> Self {
        Self {
            key,
            data: Arc::new(data),
            last_seen,
        }
    }

    /// Refresh the access timestamp
    pub fn touch(&mut self, now_ms: i64) {
        self.last_seen = now_ms;
    }

    /// Check the TTL rule; the entry expires once `ttl_ms` has fully elapsed
    pub fn is_expired(&self, now_ms: i64, ttl_ms: u64) -> bool {
        is_expired(self.last_seen, now_ms, ttl_ms)
    }

    /// Metadata record persisted next to the payload
    pub fn metadata(&self) -> StoredMetadata {
        StoredMetadata {
            id: self.key.source_id().to_string(),
            key: self.key.storage_key(),
            last_seen: self.last_seen,
        }
    }
}

/// Shared TTL rule for in-memory entries and on-disk metadata
pub fn is_expired(last_seen: i64, now_ms: i64, ttl_ms: u64) -> bool {
    let ttl = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
    now_ms.saturating_sub(last_seen) >= ttl
}

// =============================================================================
// Stored Metadata
// =============================================================================

/// JSON document written next to every filesystem payload
///
/// Only the access time lives here; codec and size travel in the payload
/// file's own header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMetadata {
    /// Avatar id the entry derives from
    pub id: String,
    /// Storage form of the entry key
    pub key: String,
    pub last_seen: i64,
}
