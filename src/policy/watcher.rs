//! Background task that reloads the policy file when it changes
//!
//! The file is polled and fingerprinted with SHA-256. Bursts of changes
//! (editors often write a file several times per save) are coalesced: a
//! reload happens only after the file has been quiet for the debounce window.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::PolicyStore;
use crate::metrics::Metrics;

/// Polling and debounce timing
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            debounce: Duration::from_secs(1),
        }
    }
}

/// Trailing-edge debouncer: fires once the last change is `window` old
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_change: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_change: None,
        }
    }

    pub fn record_change(&mut self, at: Instant) {
        self.last_change = Some(at);
    }

    pub fn is_pending(&self) -> bool {
        self.last_change.is_some()
    }

    /// True once, when a pending change has settled
    pub fn take_ready(&mut self, now: Instant) -> bool {
        match self.last_change {
            Some(at) if now.saturating_duration_since(at) >= self.window => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }
}

/// Handle to the running watcher; the task stops when this is dropped
pub struct PolicyWatcher {
    handle: JoinHandle<()>,
}

impl PolicyWatcher {
    pub fn stop(self) {
        // Drop aborts the task
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PolicyWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start watching the store's backing file.
///
/// Returns `None` when the store has no backing file.
pub fn spawn_policy_watcher(
    store: Arc<PolicyStore>,
    settings: WatchSettings,
    metrics: Option<Arc<Metrics>>,
) -> Option<PolicyWatcher> {
    let path = store.path()?.to_path_buf();
    info!(
        path = %path.display(),
        poll_ms = settings.poll_interval.as_millis() as u64,
        debounce_ms = settings.debounce.as_millis() as u64,
        "Watching budget policy file"
    );

    let handle = tokio::spawn(watch_loop(store, path, settings, metrics));
    Some(PolicyWatcher { handle })
}

async fn watch_loop(
    store: Arc<PolicyStore>,
    path: PathBuf,
    settings: WatchSettings,
    metrics: Option<Arc<Metrics>>,
) {
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut fingerprint = file_fingerprint(&path).await;
    let mut debouncer = Debouncer::new(settings.debounce);

    loop {
        interval.tick().await;

        let current = file_fingerprint(&path).await;
        if current != fingerprint {
            debug!(path = %path.display(), "policy file changed");
            fingerprint = current;
            debouncer.record_change(Instant::now());
        }

        if !debouncer.take_ready(Instant::now()) {
            continue;
        }

        match store.reload() {
            Ok(version) => {
                info!(version, "Budget policy reloaded");
                if let Some(metrics) = &metrics {
                    metrics.record_policy_reload(true);
                }
            }
            Err(e) => {
                warn!("Policy reload failed, keeping previous policy: {}", e);
                if let Some(metrics) = &metrics {
                    metrics.record_policy_reload(false);
                }
            }
        }
    }
}

async fn file_fingerprint(path: &Path) -> Option<Vec<u8>> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(Sha256::digest(&bytes).to_vec())
}
