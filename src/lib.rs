//! Petpet Server
//!
//! HTTP service that turns avatars into "petpet" GIFs, built around a
//! request-coalescing cache: identical concurrent requests share one
//! production, and finished results are kept in memory and/or on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        REST API (axum)                                   │
//! │          /:id        /avatar/:id        /stats        fallback 204       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                     PetPetCache (orchestrator)                           │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────┐    │
//! │   │ Result Store │   │ Source Store │   │ In-Flight Registries     │    │
//! │   └──────┬───────┘   └──────┬───────┘   └──────────────────────────┘    │
//! │          └────────┬─────────┘                                           │
//! │           Memory (DashMap) / Filesystem (tokio::fs)                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   Ports: SourceFetcher (HTTP provider)  ImageGenerator (renderer)       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   Sweeper (TTL eviction)          ConfigReloader (live policy)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: HTTP router and server
//! - [`backends`]: Avatar fetcher and renderer adapters
//! - [`cache`]: Stores, in-flight registries, orchestrator and sweeper
//! - [`config`]: Settings and the live cache policy
//! - [`domain`]: Port traits
//! - [`error`]: Error types and handling
//! - [`reload`]: Configuration file watcher

pub mod api;
pub mod backends;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod reload;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use backends::{CommandGenerator, HttpAvatarFetcher};

pub use cache::{
    CacheType, ClearReport, Objects, PetPetCache, PetPetParams, ResultKey, SourceKey,
    StatsSnapshot, SweepReport, Sweeper,
};

pub use config::{CachePolicy, CacheSettings, PolicyHandle, Settings};

pub use domain::{ImageGenerator, ImageGeneratorRef, SourceFetcher, SourceFetcherRef};

pub use error::{Error, ErrorKind, Result};

pub use reload::ConfigReloader;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
