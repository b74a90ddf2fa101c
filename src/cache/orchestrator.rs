//! Cache Orchestrator
//!
//! Routes a petpet request through the lookup precedence: stored result,
//! in-flight result, then a new production that itself looks up the avatar
//! (stored, in flight, or fetched) before rendering.
//!
//! Every production writes its own output to the matching store before it
//! resolves, so late arrivals find it there rather than in the registry.

use crate::cache::inflight::{InFlightRegistry, Production};
use crate::cache::key::{CacheKey, PetPetParams, ResultKey, SourceKey};
use crate::cache::metrics::{CacheMetrics, CacheStats, KindStats, Origin, StatsSnapshot};
use crate::cache::store::{EntryStore, StoreKind};
use crate::config::CachePolicy;
use crate::domain::{ImageGeneratorRef, SourceFetcherRef};
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Entries dropped by [`PetPetCache::clear`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub results: usize,
    pub sources: usize,
}

/// Request-coalescing cache in front of the avatar fetcher and renderer
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct PetPetCache {
    policy: Arc<dyn CachePolicy>,
    results: Arc<EntryStore<ResultKey>>,
    sources: Arc<EntryStore<SourceKey>>,
    result_flights: Arc<InFlightRegistry<ResultKey>>,
    source_flights: Arc<InFlightRegistry<SourceKey>>,
    fetcher: SourceFetcherRef,
    generator: ImageGeneratorRef,
    metrics: Arc<CacheMetrics>,
}

impl PetPetCache {
    /// Create a cache whose filesystem backings live under `cache_root`
    pub fn new(
        policy: Arc<dyn CachePolicy>,
        cache_root: &Path,
        fetcher: SourceFetcherRef,
        generator: ImageGeneratorRef,
    ) -> Self {
        Self {
            results: Arc::new(EntryStore::new(StoreKind::Result, cache_root, Arc::clone(&policy))),
            sources: Arc::new(EntryStore::new(StoreKind::Source, cache_root, Arc::clone(&policy))),
            result_flights: Arc::new(InFlightRegistry::new()),
            source_flights: Arc::new(InFlightRegistry::new()),
            policy,
            fetcher,
            generator,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn results(&self) -> &EntryStore<ResultKey> {
        &self.results
    }

    pub fn sources(&self) -> &EntryStore<SourceKey> {
        &self.sources
    }

    pub fn policy(&self) -> &Arc<dyn CachePolicy> {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Number of productions currently running, as (results, sources)
    pub fn in_flight(&self) -> (usize, usize) {
        (self.result_flights.len(), self.source_flights.len())
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Get the GIF for `source_id` rendered with `params`
    ///
    /// `force_refresh` skips the stored result and avatar, refetching and
    /// re-rendering, but joins a production that is already running for the
    /// same key.
    pub async fn request_result(
        &self,
        source_id: &str,
        params: &PetPetParams,
        force_refresh: bool,
    ) -> Result<Bytes> {
        let started = Instant::now();
        let key = ResultKey::new(source_id, params);

        if !force_refresh {
            if let Some(bytes) = self.results.get(&key).await {
                self.metrics.record_timing(Origin::Cache, started.elapsed());
                return Ok(bytes);
            }
        }

        if self.result_flights.has(&key) {
            debug!(key = %key, "Joining in-flight production");
        }
        let outcome = self.start_result_production(key, force_refresh).await;
        if outcome.is_ok() {
            self.metrics.record_timing(Origin::Scratch, started.elapsed());
        }
        outcome
    }

    /// Get the avatar for `source_id`, optionally at a specific size
    pub async fn request_source(&self, source_id: &str, size: Option<u32>) -> Result<Bytes> {
        self.obtain_source(SourceKey::new(source_id, size), false).await
    }

    fn start_result_production(&self, key: ResultKey, force_refresh: bool) -> Production {
        let this = self.clone();
        let producer_key = key.clone();
        self.result_flights.start(key, async move {
            // a production that finished after the caller's lookup has stored it
            if !force_refresh {
                if let Some(bytes) = this.results.get(&producer_key).await {
                    return Ok(bytes);
                }
            }

            let source = this
                .obtain_source(SourceKey::new(producer_key.source_id(), None), force_refresh)
                .await?;

            this.metrics.record_production();
            let gif = this
                .generator
                .generate(source, producer_key.params())
                .await
                .map_err(|e| match e {
                    Error::GenerationFailed { .. } => e,
                    Error::Renderer(reason) => Error::GenerationFailed {
                        key: producer_key.storage_key(),
                        reason,
                    },
                    other => Error::GenerationFailed {
                        key: producer_key.storage_key(),
                        reason: other.to_string(),
                    },
                })?;

            let stored = this.results.put(&producer_key, gif.clone()).await;
            info!(key = %producer_key, bytes = gif.len(), stored, "Rendered petpet");
            Ok(gif)
        })
    }

    /// Stored avatar, else the in-flight fetch, else a new fetch
    ///
    /// `refresh` skips the stored avatar.
    async fn obtain_source(&self, key: SourceKey, refresh: bool) -> Result<Bytes> {
        if !refresh {
            if let Some(bytes) = self.sources.get(&key).await {
                return Ok(bytes);
            }
        }

        let this = self.clone();
        let fetch_key = key.clone();
        self.source_flights
            .start(key, async move {
                if !refresh {
                    if let Some(bytes) = this.sources.get(&fetch_key).await {
                        return Ok(bytes);
                    }
                }

                this.metrics.record_fetch();
                let bytes = this
                    .fetcher
                    .fetch(fetch_key.source_id(), fetch_key.size())
                    .await
                    .map_err(|e| match e {
                        Error::SourceUnavailable { .. } => e,
                        other => Error::SourceUnavailable {
                            id: fetch_key.source_id().to_string(),
                            status: None,
                            reason: other.to_string(),
                        },
                    })?;

                let stored = this.sources.put(&fetch_key, bytes.clone()).await;
                debug!(key = %fetch_key, bytes = bytes.len(), stored, "Fetched avatar");
                Ok(bytes)
            })
            .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Whether any stored result was rendered from avatar `source_id`
    pub async fn is_source_referenced(&self, source_id: &str) -> bool {
        self.results
            .list_keys()
            .await
            .iter()
            .any(|key| key.source_id() == source_id)
    }

    /// Drop stored avatars that no stored result depends on
    ///
    /// Avatars with a fetch in flight are kept.
    pub async fn prune_orphan_sources(&self) -> usize {
        let referenced: HashSet<String> = self
            .results
            .list_keys()
            .await
            .into_iter()
            .map(|key| key.source_id().to_string())
            .collect();

        let mut removed = 0;
        for key in self.sources.list_keys().await {
            if referenced.contains(key.source_id()) || self.source_flights.has(&key) {
                continue;
            }
            if self.sources.remove(&key).await {
                debug!(key = %key, "Pruned orphan avatar");
                removed += 1;
            }
        }
        removed
    }

    /// Drop every stored result and avatar in both backings
    pub async fn clear(&self) -> ClearReport {
        let report = ClearReport {
            results: self.results.clear().await,
            sources: self.sources.clear().await,
        };
        if report.results + report.sources > 0 {
            warn!(results = report.results, sources = report.sources, "Cache cleared");
        }
        report
    }

    /// Current statistics document
    pub async fn stats(&self) -> StatsSnapshot {
        let (results_in_flight, sources_in_flight) = self.in_flight();
        let gif_tiers = self.results.counts().await;
        let avatar_tiers = self.sources.counts().await;

        StatsSnapshot {
            cache: CacheStats {
                cache_type: self.policy.cache_type(),
                enabled: self.policy.enabled(),
                permanent: self.policy.permanent(),
                gif: KindStats {
                    in_cache: gif_tiers.total(),
                    processing: results_in_flight as u64,
                    tiers: gif_tiers,
                    memory_bytes: self.results.memory_bytes(),
                },
                avatar: KindStats {
                    in_cache: avatar_tiers.total(),
                    processing: sources_in_flight as u64,
                    tiers: avatar_tiers,
                    memory_bytes: self.sources.memory_bytes(),
                },
            },
            response: self.metrics.response_snapshot(),
            engine: self.metrics.engine_snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, PolicyHandle};
    use crate::domain::{ImageGenerator, SourceFetcher};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for EchoFetcher {
        async fn fetch(&self, id: &str, _size: Option<u32>) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("png:{}", id)))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl ImageGenerator for BrokenGenerator {
        async fn generate(&self, _source: Bytes, _params: &PetPetParams) -> Result<Bytes> {
            Err(Error::Internal("renderer crashed".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_generator_errors_become_generation_failed() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = PetPetCache::new(
            Arc::new(PolicyHandle::new(CacheSettings::default())),
            dir.path(),
            fetcher.clone(),
            Arc::new(BrokenGenerator),
        );

        let outcome = cache.request_result("42", &PetPetParams::default(), false).await;
        assert_matches!(outcome, Err(Error::GenerationFailed { ref reason, .. }) if reason.contains("renderer crashed"));

        // the avatar survives the failed render
        assert!(cache.sources().has(&SourceKey::new("42", None)).await);
        assert!(cache.results().list_keys().await.is_empty());
        assert_eq!(cache.in_flight(), (0, 0));
    }

    #[tokio::test]
    async fn test_request_source_caches_by_size() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = PetPetCache::new(
            Arc::new(PolicyHandle::default()),
            dir.path(),
            fetcher.clone(),
            Arc::new(BrokenGenerator),
        );

        cache.request_source("7", Some(64)).await.unwrap();
        cache.request_source("7", Some(64)).await.unwrap();
        cache.request_source("7", None).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_source_referenced("7").await);
        assert_eq!(cache.prune_orphan_sources().await, 2);
    }
}
