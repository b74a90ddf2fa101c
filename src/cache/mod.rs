//! Request-Coalescing Petpet Cache
//!
//! Two keyed stores (generated GIFs and fetched avatars), each backed by
//! memory, the filesystem, or both, with in-flight deduplication in front:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PetPetCache (orchestrator)                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  request_result ──► Result Store ──► Result In-Flight ──► production     │
//! │                                                              │           │
//! │                     Source Store ◄── Source In-Flight ◄──────┘           │
//! │                          │                                               │
//! │          ┌───────────────┴──────────────┐                                │
//! │  ┌───────┴──────┐               ┌───────┴──────┐                         │
//! │  │   Memory     │               │  Filesystem  │                         │
//! │  │  (DashMap)   │               │ (<key>.gif + │                         │
//! │  │              │               │  <key>.json) │                         │
//! │  └──────────────┘               └──────────────┘                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Sweeper: single interval task, evicts expired results                  │
//! │  Policy: read live on every operation, replaceable at runtime           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use petpet_server::cache::{PetPetCache, PetPetParams, Sweeper};
//! use petpet_server::config::{CacheSettings, PolicyHandle};
//!
//! let policy = PolicyHandle::new(CacheSettings::default());
//! let cache = PetPetCache::new(Arc::new(policy.clone()), &root, fetcher, generator);
//!
//! let gif = cache.request_result("117378255429959680", &PetPetParams::default(), false).await?;
//!
//! let sweeper = Sweeper::new(cache.clone(), policy.subscribe()).spawn(shutdown.clone());
//! ```

pub mod compression;
pub mod entry;
pub mod inflight;
pub mod key;
pub mod metrics;
pub mod orchestrator;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod tier;

// Re-export main types
pub use compression::{CompressionConfig, CompressionManager};
pub use entry::{CacheData, CacheEntry, CompressionAlgorithm, StoredMetadata};
pub use inflight::{InFlightRegistry, Production};
pub use key::{CacheKey, Objects, PetPetParams, ResultKey, SourceKey};
pub use metrics::{CacheMetrics, Origin, Route, StatsSnapshot};
pub use orchestrator::{ClearReport, PetPetCache};
pub use storage::{FilesystemStorage, MemoryStorage, TierStorage};
pub use store::{EntryStore, StoreKind, TierCounts};
pub use sweeper::{SweepReport, Sweeper};
pub use tier::{Backing, CacheType};
