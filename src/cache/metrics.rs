//! Cache Metrics
//!
//! Lock-free counters for request outcomes and response times, plus the
//! serializable snapshot served on `/stats`. Counter blocks are cache-line
//! aligned so the two routes never contend on the same line.

use crate::cache::store::TierCounts;
use crate::cache::tier::CacheType;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Routes & Origins
// =============================================================================

/// HTTP routes that serve images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/:id`
    PetPet,
    /// `/avatar/:id`
    Avatar,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::PetPet => "/:id",
            Route::Avatar => "/avatar/:id",
        }
    }
}

/// Where a served result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced (or joined while producing)
    Scratch,
    /// Served from a result store
    Cache,
}

// =============================================================================
// Counter Blocks
// =============================================================================

/// Success/failure counters for one route
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct RouteMetrics {
    pub successful: AtomicU64,
    pub failed: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<RouteMetrics>() <= CACHE_LINE_SIZE);

impl RouteMetrics {
    #[inline]
    pub fn record(&self, success: bool) {
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        RouteSnapshot {
            successful,
            failed,
            total: successful + failed,
        }
    }
}

/// Running average of response times
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct TimingMetrics {
    total_micros: AtomicU64,
    samples: AtomicU64,
}

impl TimingMetrics {
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Average in milliseconds, rounded to four decimals; zero without samples
    pub fn average_ms(&self) -> f64 {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        let avg = self.total_micros.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0;
        (avg * 10_000.0).round() / 10_000.0
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// All counters of a running server
#[derive(Debug, Default)]
pub struct CacheMetrics {
    petpet_route: RouteMetrics,
    avatar_route: RouteMetrics,
    from_scratch: TimingMetrics,
    from_cache: TimingMetrics,
    /// Results produced (fetch + render), not joined
    pub productions: AtomicU64,
    /// Avatars fetched from the provider
    pub fetches: AtomicU64,
    /// Results removed by the sweeper
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, route: Route) -> &RouteMetrics {
        match route {
            Route::PetPet => &self.petpet_route,
            Route::Avatar => &self.avatar_route,
        }
    }

    /// Record the outcome of a request on `route`
    pub fn record_response(&self, route: Route, success: bool) {
        self.route(route).record(success);
    }

    /// Record how long a result took to serve
    pub fn record_timing(&self, origin: Origin, elapsed: Duration) {
        match origin {
            Origin::Scratch => self.from_scratch.record(elapsed),
            Origin::Cache => self.from_cache.record(elapsed),
        }
    }

    pub fn timing(&self, origin: Origin) -> &TimingMetrics {
        match origin {
            Origin::Scratch => &self.from_scratch,
            Origin::Cache => &self.from_cache,
        }
    }

    #[inline]
    pub fn record_production(&self) {
        self.productions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Response section of the stats document
    pub fn response_snapshot(&self) -> ResponseStats {
        let petpet = self.petpet_route.snapshot();
        let avatar = self.avatar_route.snapshot();
        ResponseStats {
            successful: petpet.successful + avatar.successful,
            failed: petpet.failed + avatar.failed,
            total: petpet.total + avatar.total,
            routes: RouteStats { petpet, avatar },
            average: AverageStats {
                from_scratch: self.from_scratch.average_ms(),
                from_cache: self.from_cache.average_ms(),
            },
        }
    }

    /// Engine counters section of the stats document
    pub fn engine_snapshot(&self) -> EngineStats {
        EngineStats {
            productions: self.productions.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Complete stats document
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub cache: CacheStats,
    pub response: ResponseStats,
    pub engine: EngineStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    pub enabled: bool,
    pub permanent: bool,
    pub gif: KindStats,
    pub avatar: KindStats,
}

/// Per-kind cache occupancy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
    /// Entries summed over active backings
    pub in_cache: u64,
    /// Productions currently in flight
    pub processing: u64,
    pub tiers: TierCounts,
    /// Payload bytes held by the memory backing
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub successful: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    #[serde(rename = "/:id")]
    pub petpet: RouteSnapshot,
    #[serde(rename = "/avatar/:id")]
    pub avatar: RouteSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageStats {
    pub from_scratch: f64,
    pub from_cache: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseStats {
    pub routes: RouteStats,
    pub average: AverageStats,
    pub successful: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub productions: u64,
    pub fetches: u64,
    pub evictions: u64,
}
