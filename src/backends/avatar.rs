//! HTTP avatar fetcher

use crate::config::UpstreamSettings;
use crate::domain::SourceFetcher;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Fetches avatars with `GET {base}/{id}[?size=N]`
#[derive(Debug, Clone)]
pub struct HttpAvatarFetcher {
    client: Client,
    base: String,
}

impl HttpAvatarFetcher {
    pub fn new(settings: &UpstreamSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: normalize_base(&settings.provider_url),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("petpet-server/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, id: &str) -> String {
        format!("{}/{}", self.base, id)
    }
}

/// Accept bare domain names as the provider
fn normalize_base(provider: &str) -> String {
    let trimmed = provider.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl SourceFetcher for HttpAvatarFetcher {
    async fn fetch(&self, id: &str, size: Option<u32>) -> Result<Bytes> {
        let mut request = self.client.get(self.url(id));
        if let Some(size) = size {
            request = request.query(&[("size", size)]);
        }

        let unavailable = |status: Option<u16>, reason: String| Error::SourceUnavailable {
            id: id.to_string(),
            status,
            reason,
        };

        let response = request
            .send()
            .await
            .map_err(|e| unavailable(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status
                .canonical_reason()
                .unwrap_or("upstream error")
                .to_string();
            return Err(unavailable(Some(status.as_u16()), reason));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| unavailable(None, e.to_string()))?;
        debug!(id, size, bytes = bytes.len(), "Avatar downloaded");
        Ok(bytes)
    }

    fn name(&self) -> &str {
        "http"
    }
}
