//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use petpet_server::cache::PetPetParams;
use petpet_server::config::{CacheSettings, PolicyHandle};
use petpet_server::{Error, ImageGenerator, PetPetCache, Result, SourceFetcher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fetcher that counts calls; id `404` is refused by the "provider"
#[derive(Default)]
pub struct CountingFetcher {
    calls: AtomicUsize,
    delay: Duration,
    sizes: Mutex<Vec<Option<u32>>>,
}

impl CountingFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sizes(&self) -> Vec<Option<u32>> {
        self.sizes.lock().clone()
    }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    async fn fetch(&self, id: &str, size: Option<u32>) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sizes.lock().push(size);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if id == "404" {
            return Err(Error::SourceUnavailable {
                id: id.to_string(),
                status: Some(404),
                reason: "Not Found".into(),
            });
        }
        Ok(Bytes::from(format!("png:{}", id)))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Generator that counts calls and encodes its inputs in the output
#[derive(Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingGenerator {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn expected(source: &str, params: &PetPetParams) -> Bytes {
        Bytes::from(format!("gif:{}:{}", source, params.squeeze))
    }
}

#[async_trait]
impl ImageGenerator for CountingGenerator {
    async fn generate(&self, source: Bytes, params: &PetPetParams) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let source = String::from_utf8_lossy(&source).into_owned();
        Ok(Self::expected(&source, params))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

pub struct Harness {
    pub cache: PetPetCache,
    pub policy: PolicyHandle,
    pub fetcher: Arc<CountingFetcher>,
    pub generator: Arc<CountingGenerator>,
}

impl Harness {
    pub fn new(root: &Path, settings: CacheSettings) -> Self {
        Self::with_fakes(
            root,
            settings,
            CountingFetcher::default(),
            CountingGenerator::default(),
        )
    }

    pub fn with_fakes(
        root: &Path,
        settings: CacheSettings,
        fetcher: CountingFetcher,
        generator: CountingGenerator,
    ) -> Self {
        let policy = PolicyHandle::new(settings);
        let fetcher = Arc::new(fetcher);
        let generator = Arc::new(generator);
        let cache = PetPetCache::new(
            Arc::new(policy.clone()),
            root,
            fetcher.clone(),
            generator.clone(),
        );
        Self {
            cache,
            policy,
            fetcher,
            generator,
        }
    }
}
