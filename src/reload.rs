//! Live Configuration Reload
//!
//! Watches the configuration file and swaps the cache policy in place when
//! it changes. The directory is watched rather than the file so that editors
//! replacing the file atomically are still seen.

use crate::config::{CacheSettings, PolicyHandle};
use crate::error::{Error, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Quiet period that folds bursts of file events into one reload
const DEBOUNCE: Duration = Duration::from_millis(150);

type LoadFn = Box<dyn Fn(&Path) -> Result<CacheSettings> + Send + Sync>;

/// Reloads [`CacheSettings`] into a [`PolicyHandle`] on file change
pub struct ConfigReloader {
    path: PathBuf,
    policy: PolicyHandle,
    load: LoadFn,
}

impl ConfigReloader {
    /// `load` turns the file into the cache settings to apply
    pub fn new(
        path: impl Into<PathBuf>,
        policy: PolicyHandle,
        load: impl Fn(&Path) -> Result<CacheSettings> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            policy,
            load: Box::new(load),
        }
    }

    /// Load the file once and apply it if the policy differs
    pub fn reload(&self) -> Result<bool> {
        let settings = (self.load)(&self.path)?;
        settings.validate()?;
        if settings == self.policy.snapshot() {
            return Ok(false);
        }
        self.policy.replace(settings);
        Ok(true)
    }

    /// Start watching; the watcher lives as long as the returned task
    pub fn spawn(self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!(error = %e, "Config watch error"),
            }
        })
        .map_err(|e| Error::Configuration(format!("cannot watch config: {}", e)))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Configuration(format!("cannot watch {}: {}", dir.display(), e)))?;
        info!(path = %self.path.display(), "Watching configuration");

        Ok(tokio::spawn(self.run(watcher, rx, shutdown)))
    }

    async fn run(
        self,
        _watcher: RecommendedWatcher,
        mut rx: mpsc::UnboundedReceiver<()>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    if event.is_none() {
                        return;
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}

                    match self.reload() {
                        Ok(true) => info!(path = %self.path.display(), "Cache policy reloaded"),
                        Ok(false) => debug!("Configuration touched, policy unchanged"),
                        Err(e) => warn!(error = %e, "Ignoring invalid configuration"),
                    }
                }

                () = shutdown.cancelled() => {
                    debug!("Config watcher stopped");
                    return;
                }
            }
        }
    }
}
