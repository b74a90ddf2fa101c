//! Server Configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! CLI flags and environment variables (applied in `main`). The cache part of
//! the configuration is exposed to the engine as a live [`CachePolicy`] that
//! can be replaced at runtime.

use crate::cache::entry::CompressionAlgorithm;
use crate::cache::tier::CacheType;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Settings
// =============================================================================

/// Complete server configuration, as read from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
    pub renderer: RendererSettings,
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// Not validated: CLI and environment overrides still apply on top, so
    /// callers validate the layered result.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Parse and validate a complete configuration
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.upstream.provider_url.trim().is_empty() {
            return Err(Error::Configuration(
                "upstream.provider_url must not be empty".into(),
            ));
        }
        if self.renderer.command.trim().is_empty() {
            return Err(Error::Configuration(
                "renderer.command must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings (changes require a restart)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Prometheus metrics and health listener
    pub metrics_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            metrics_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Cache policy values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Global cache toggle
    pub enabled: bool,
    pub cache_type: CacheType,
    /// Result TTL in milliseconds
    pub cache_time: u64,
    /// Sweep interval in milliseconds
    pub cache_check_time: u64,
    /// Disable expiry entirely
    pub permanent: bool,
    /// Cache fetched avatars
    pub avatars: bool,
    /// Codec for payloads at rest
    pub compression: CompressionAlgorithm,
    /// Sweeper also drops avatars no cached result depends on
    pub prune_orphan_avatars: bool,
    /// Filesystem root (read once at startup)
    pub cache_dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_type: CacheType::Code,
            cache_time: 15 * 60 * 1000,
            cache_check_time: 60 * 1000,
            permanent: false,
            avatars: true,
            compression: CompressionAlgorithm::None,
            prune_orphan_avatars: false,
            cache_dir: PathBuf::from("./cache"),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        if self.cache_check_time == 0 {
            return Err(Error::Configuration(
                "cache.cache_check_time must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Avatar provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Base URL; avatars are fetched from `{provider_url}/{id}`. Required.
    pub provider_url: String,
    pub timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            provider_url: String::new(),
            timeout_ms: 10_000,
        }
    }
}

/// External renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Renderer executable
    pub command: String,
    /// Arguments placed before the generation parameters
    pub args: Vec<String>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            command: "petpet-render".to_string(),
            args: Vec::new(),
        }
    }
}

// =============================================================================
// Cache Policy
// =============================================================================

/// Live view of the cache policy
///
/// Every getter reads the current value; callers must not hold on to the
/// answers across operations.
pub trait CachePolicy: Send + Sync {
    fn enabled(&self) -> bool;
    fn cache_type(&self) -> CacheType;
    fn cache_time_ms(&self) -> u64;
    fn cache_check_time_ms(&self) -> u64;
    fn permanent(&self) -> bool;
    fn avatars(&self) -> bool;
    fn compression(&self) -> CompressionAlgorithm;
    fn prune_orphan_avatars(&self) -> bool;
}

struct PolicyInner {
    settings: RwLock<CacheSettings>,
    /// Bumped on every replacement
    changes: watch::Sender<u64>,
}

/// Shared, replaceable cache policy
#[derive(Clone)]
pub struct PolicyHandle {
    inner: Arc<PolicyInner>,
}

impl PolicyHandle {
    pub fn new(settings: CacheSettings) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(PolicyInner {
                settings: RwLock::new(settings),
                changes,
            }),
        }
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> CacheSettings {
        self.inner.settings.read().clone()
    }

    /// Replace the whole policy and notify subscribers
    pub fn replace(&self, settings: CacheSettings) {
        *self.inner.settings.write() = settings;
        self.notify();
    }

    /// Modify the policy in place and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut CacheSettings)) {
        f(&mut self.inner.settings.write());
        self.notify();
    }

    /// Receiver that observes every policy change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|generation| *generation += 1);
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl std::fmt::Debug for PolicyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PolicyHandle")
            .field(&*self.inner.settings.read())
            .finish()
    }
}

impl CachePolicy for PolicyHandle {
    fn enabled(&self) -> bool {
        self.inner.settings.read().enabled
    }

    fn cache_type(&self) -> CacheType {
        self.inner.settings.read().cache_type
    }

    fn cache_time_ms(&self) -> u64 {
        self.inner.settings.read().cache_time
    }

    fn cache_check_time_ms(&self) -> u64 {
        self.inner.settings.read().cache_check_time
    }

    fn permanent(&self) -> bool {
        self.inner.settings.read().permanent
    }

    fn avatars(&self) -> bool {
        self.inner.settings.read().avatars
    }

    fn compression(&self) -> CompressionAlgorithm {
        self.inner.settings.read().compression
    }

    fn prune_orphan_avatars(&self) -> bool {
        self.inner.settings.read().prune_orphan_avatars
    }
}
