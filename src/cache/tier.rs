//! Cache Tier Definitions
//!
//! Defines the two backings (memory, filesystem) and the cache type policy
//! that selects which of them are active.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Backing
// =============================================================================

/// A single storage backing of an entry store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    /// In-process map (synchronous, cheapest)
    Memory,
    /// Payload + metadata files under the cache directory
    Filesystem,
}

impl Backing {
    /// All backings in lookup order (memory first)
    pub fn lookup_order() -> &'static [Backing] {
        &[Backing::Memory, Backing::Filesystem]
    }
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Memory => write!(f, "memory"),
            Backing::Filesystem => write!(f, "filesystem"),
        }
    }
}

// =============================================================================
// Cache Type
// =============================================================================

/// Which backings are active for cache reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Memory only
    #[default]
    #[serde(alias = "in-code", alias = "memory")]
    Code,
    /// Filesystem only
    Fs,
    /// Memory and filesystem, kept in sync on write
    Both,
}

impl CacheType {
    /// Check whether a backing is active under this cache type
    pub fn uses(&self, backing: Backing) -> bool {
        match (self, backing) {
            (CacheType::Both, _) => true,
            (CacheType::Code, Backing::Memory) => true,
            (CacheType::Fs, Backing::Filesystem) => true,
            _ => false,
        }
    }

    /// Active backings in lookup order
    pub fn active_backings(self) -> impl Iterator<Item = Backing> {
        Backing::lookup_order()
            .iter()
            .copied()
            .filter(move |backing| self.uses(*backing))
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Code => write!(f, "code"),
            CacheType::Fs => write!(f, "fs"),
            CacheType::Both => write!(f, "both"),
        }
    }
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" | "in-code" | "memory" => Ok(CacheType::Code),
            "fs" | "filesystem" => Ok(CacheType::Fs),
            "both" => Ok(CacheType::Both),
            other => Err(format!(
                "unknown cache type '{}', expected 'code', 'fs' or 'both'",
                other
            )),
        }
    }
}
