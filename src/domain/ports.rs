//! Domain Ports - Core trait definitions for the petpet server
//!
//! These traits define the boundaries between the cache engine and the
//! outside world. Adapters in `crate::backends` implement them; tests plug in
//! in-process fakes.

use crate::cache::key::PetPetParams;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

// =============================================================================
// Source Fetcher Port
// =============================================================================

/// Port for fetching raw avatar images from the upstream provider
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the avatar for `id`, optionally at a requested size
    ///
    /// A refusal by the provider must surface as
    /// [`Error::SourceUnavailable`](crate::error::Error::SourceUnavailable)
    /// carrying the provider's status code.
    async fn fetch(&self, id: &str, size: Option<u32>) -> Result<Bytes>;

    /// Get fetcher name
    fn name(&self) -> &str;
}

// =============================================================================
// Image Generator Port
// =============================================================================

/// Port for rendering a petpet GIF from an avatar
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Render a GIF
    ///
    /// Adapters report renderer trouble as
    /// [`Error::Renderer`](crate::error::Error::Renderer); the cache turns
    /// any failure into `GenerationFailed` for the affected key.
    async fn generate(&self, source: Bytes, params: &PetPetParams) -> Result<Bytes>;

    /// Get generator name
    fn name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Dependency Injection
// =============================================================================

pub type SourceFetcherRef = Arc<dyn SourceFetcher>;
pub type ImageGeneratorRef = Arc<dyn ImageGenerator>;
