//! HTTP API Server

use crate::cache::PetPetCache;
use crate::config::ServerSettings;
use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::RestRouter;

/// Bind address of the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl From<&ServerSettings> for ApiServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

/// Serves the REST API until shut down
pub struct ApiServer {
    config: ApiServerConfig,
    cache: PetPetCache,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, cache: PetPetCache) -> Self {
        Self { config, cache }
    }

    /// Run the API server until `shutdown` fires, then drain open requests
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let app = RestRouter::new(self.cache).build();

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to bind {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;
        info!(addr = %listener.local_addr()?, "REST API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }
}
