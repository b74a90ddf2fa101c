//! Eviction Sweeper
//!
//! Periodically removes expired results. A single task owns the only timer,
//! so sweeps never overlap. The timer is rebuilt whenever the cache policy
//! changes, and it stays idle while the cache is disabled or permanent.

use crate::cache::entry::now_ms;
use crate::cache::orchestrator::PetPetCache;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Result keys examined
    pub scanned: usize,
    /// Expired results removed
    pub removed: usize,
    /// Unreferenced avatars removed
    pub orphans_removed: usize,
}

/// Expiry sweeper for a [`PetPetCache`]
pub struct Sweeper {
    cache: PetPetCache,
    changes: watch::Receiver<u64>,
}

impl Sweeper {
    /// `changes` fires on every policy replacement
    pub fn new(cache: PetPetCache, changes: watch::Receiver<u64>) -> Self {
        Self { cache, changes }
    }

    /// Whether sweeping is allowed under the current policy
    pub fn is_active(&self) -> bool {
        let policy = self.cache.policy();
        policy.enabled() && !policy.permanent()
    }

    /// Sweep against the current time
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(now_ms()).await
    }

    /// Sweep as if the clock read `now_ms`
    pub async fn sweep_at(&self, now_ms: i64) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.is_active() {
            return report;
        }

        let results = self.cache.results();
        for key in results.list_keys().await {
            report.scanned += 1;
            if results.check_expired(&key, now_ms).await && results.remove(&key).await {
                debug!(key = %key, "Evicted expired result");
                report.removed += 1;
            }
        }

        if self.cache.policy().prune_orphan_avatars() {
            report.orphans_removed = self.cache.prune_orphan_sources().await;
        }

        self.cache.metrics().record_evictions(report.removed as u64);
        if report.removed > 0 || report.orphans_removed > 0 {
            info!(
                scanned = report.scanned,
                removed = report.removed,
                orphans = report.orphans_removed,
                "Cache sweep completed"
            );
        }
        report
    }

    /// Run the sweep loop on its own task until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut changes = self.changes.clone();
        let mut watching = true;
        loop {
            let period = Duration::from_millis(self.cache.policy().cache_check_time_ms().max(1));
            let active = self.is_active();
            debug!(period_ms = period.as_millis() as u64, active, "Sweeper armed");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    _ = interval.tick(), if active => {
                        self.sweep().await;
                    }

                    changed = changes.changed(), if watching => {
                        if changed.is_err() {
                            // policy can no longer change; keep the current timer
                            watching = false;
                            continue;
                        }
                        break;
                    }

                    () = shutdown.cancelled() => {
                        debug!("Sweeper stopped");
                        return;
                    }
                }
            }
        }
    }
}
