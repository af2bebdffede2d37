//! Snapshot-based configuration manager with file watching and remote refresh.

use super::{app_config_path, AppConfig, Config, RemoteAppConfig};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll period of the file watcher
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout of one remote config fetch
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves immutable [`Config`] snapshots.
///
/// Readers clone an `Arc`; writers build a complete new snapshot and swap it
/// under the write lock. Subscribers are notified through a watch channel.
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
    app_config_path: PathBuf,
    current: RwLock<Arc<Config>>,
    notify: watch::Sender<Arc<Config>>,
    mtimes: Mutex<(Option<SystemTime>, Option<SystemTime>)>,
    last_remote: Mutex<Option<RemoteAppConfig>>,
    http: reqwest::Client,
}

impl ConfigManager {
    /// Load configuration from disk and build the manager.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::from_file(&config_path)?;
        Self::with_config(config_path, config)
    }

    /// Build a manager around an already-loaded snapshot.
    pub fn with_config(config_path: PathBuf, config: Config) -> Result<Arc<Self>> {
        let app_config_path = app_config_path(&config_path);
        let http = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("build http client: {e}")))?;

        let snapshot = Arc::new(config);
        let (notify, _) = watch::channel(snapshot.clone());
        let mtimes = (modified(&config_path), modified(&app_config_path));

        Ok(Arc::new(Self {
            config_path,
            app_config_path,
            current: RwLock::new(snapshot),
            notify,
            mtimes: Mutex::new(mtimes),
            last_remote: Mutex::new(None),
            http,
        }))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Current business config
    pub fn app_config(&self) -> AppConfig {
        self.current.read().app_config.clone()
    }

    /// Receive every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.notify.subscribe()
    }

    fn swap(&self, config: Config) {
        let snapshot = Arc::new(config);
        *self.current.write() = snapshot.clone();
        self.notify.send_replace(snapshot);
    }

    /// Re-read both files and publish a new snapshot. Parse failures keep
    /// the previous snapshot.
    pub fn reload(&self) -> Result<()> {
        let config = Config::from_file(&self.config_path)?;
        self.swap(config);
        info!(path = %self.config_path.display(), "Configuration reloaded");
        Ok(())
    }

    /// Persist a new business config and publish it.
    pub fn update_app_config(&self, app: AppConfig) -> Result<()> {
        app.validate()?;
        app.save(&self.app_config_path)?;
        let mut config = (*self.snapshot()).clone();
        config.app_config = app;
        self.swap(config);
        self.mtimes.lock().1 = modified(&self.app_config_path);
        Ok(())
    }

    /// Check modification times once; reload when either file changed.
    pub fn poll_files(&self) -> bool {
        let now = (modified(&self.config_path), modified(&self.app_config_path));
        let changed = {
            let mut last = self.mtimes.lock();
            if *last == now {
                false
            } else {
                *last = now;
                true
            }
        };
        if !changed {
            return false;
        }
        match self.reload() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping previous snapshot");
                false
            }
        }
    }

    /// Poll both files until cancelled.
    pub async fn watch_files(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(FILE_POLL_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.poll_files();
                }
            }
        }
    }

    /// Fetch the remote business config once. Returns true when it changed
    /// and was applied.
    pub async fn refresh_remote(&self) -> Result<bool> {
        let endpoint = self.snapshot().app_config_service.endpoint.clone();
        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("remote config {endpoint}"))
                } else {
                    Error::dependency(format!("remote config {endpoint}: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::dependency(format!(
                "remote config {endpoint}: status {}",
                response.status()
            )));
        }
        let remote: RemoteAppConfig = response
            .json()
            .await
            .map_err(|e| Error::dependency(format!("decode remote config: {e}")))?;

        if self.last_remote.lock().as_ref() == Some(&remote) {
            debug!("Remote config unchanged");
            return Ok(false);
        }

        let app = remote.to_app_config(&self.app_config());
        self.update_app_config(app)?;
        *self.last_remote.lock() = Some(remote);
        info!(endpoint = %endpoint, "Remote app config applied");
        Ok(true)
    }

    /// Refresh from the remote service every `refresh_interval` until cancelled.
    pub async fn run_remote_refresher(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let service = self.snapshot().app_config_service.clone();
        if !service.enabled {
            debug!("Remote config refresher disabled");
            return Ok(());
        }
        let mut ticker = tokio::time::interval(service.refresh_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_remote().await {
                        warn!(error = %e, "Remote config refresh failed");
                    }
                }
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
