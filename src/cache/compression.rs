//! Compression Support
//!
//! Payload codecs for cached images. The algorithm is chosen per write from
//! the live cache policy; reads use whatever algorithm the entry records, so
//! a policy change never strands existing entries.

use crate::cache::entry::{CacheData, CompressionAlgorithm};
use crate::error::{Error, Result};
use bytes::Bytes;

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Payloads smaller than this are stored uncompressed
    pub min_size_bytes: u64,
    /// Compression level (algorithm-specific)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 512,
            level: 3,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block codec with size prefix
struct Lz4Compressor {
    level: i32,
}

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::Compression(format!("LZ4 compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None)
            .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {}", e)))
    }
}

struct ZstdCompressor {
    level: i32,
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| Error::Compression(format!("Zstd compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::Compression(format!("Zstd decompression failed: {}", e)))
    }
}

struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy decompression failed: {}", e)))
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Encodes payloads for storage and decodes them on read
pub struct CompressionManager {
    config: CompressionConfig,
    lz4: Lz4Compressor,
    zstd: ZstdCompressor,
    snappy: SnappyCompressor,
}

impl CompressionManager {
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor {
                level: config.level,
            },
            zstd: ZstdCompressor {
                level: config.level,
            },
            snappy: SnappyCompressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Compressor> {
        match algorithm {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Lz4 => Some(&self.lz4),
            CompressionAlgorithm::Zstd => Some(&self.zstd),
            CompressionAlgorithm::Snappy => Some(&self.snappy),
        }
    }

    /// Encode a payload with `algorithm`
    ///
    /// Falls back to storing the payload as-is when it is below the minimum
    /// size, when the codec fails, or when compression does not shrink it.
    pub fn encode(&self, data: Bytes, algorithm: CompressionAlgorithm) -> CacheData {
        let Some(compressor) = self.compressor(algorithm) else {
            return CacheData::uncompressed(data);
        };
        if (data.len() as u64) < self.config.min_size_bytes {
            return CacheData::uncompressed(data);
        }

        match compressor.compress(&data) {
            Ok(compressed) if compressed.len() < data.len() => {
                CacheData::encoded(Bytes::from(compressed), data.len() as u64, algorithm)
            }
            Ok(_) => CacheData::uncompressed(data),
            Err(e) => {
                tracing::warn!(%algorithm, "Compression failed, storing uncompressed: {}", e);
                CacheData::uncompressed(data)
            }
        }
    }

    /// Decode a stored payload back to the original bytes
    pub fn decode(&self, data: &CacheData) -> Result<Bytes> {
        match self.compressor(data.algorithm) {
            None => Ok(data.bytes.clone()),
            Some(compressor) => Ok(Bytes::from(compressor.decompress(&data.bytes)?)),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}
