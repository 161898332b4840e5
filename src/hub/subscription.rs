//! One watch task per observed root.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::protocol::ServerMessage;
use crate::watcher::{FileFingerprint, FsWatcher, RawEvent};

use super::broadcast::WeakHub;
use super::normalize::ChangeNormalizer;

const RECORD_CHANNEL_CAPACITY: usize = 256;

/// Shared watch on a root, reference-counted by attached connections.
///
/// Dropping the subscription stops its task and releases the OS watch.
pub(crate) struct WatchSubscription {
    pub(crate) refs: usize,
    pub(crate) degraded: Option<String>,
    record_tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
}

impl WatchSubscription {
    pub(crate) fn start(hub: WeakHub, root: PathBuf, config: WatchConfig) -> Self {
        let cancel = CancellationToken::new();
        let (record_tx, record_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        tokio::spawn(run_watch(hub, root, config, cancel.clone(), record_rx));

        Self {
            refs: 1,
            degraded: None,
            record_tx,
            cancel,
        }
    }

    /// Treat `path` as touched, as if the OS had reported it.
    pub(crate) fn record(&self, path: PathBuf) {
        if self.record_tx.try_send(path).is_err() {
            tracing::warn!("[hub] record queue full, relying on the OS event");
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_watch(
    hub: WeakHub,
    root: PathBuf,
    config: WatchConfig,
    cancel: CancellationToken,
    mut record_rx: mpsc::Receiver<PathBuf>,
) {
    let mut watcher = tokio::select! {
        _ = cancel.cancelled() => return,
        started = start_watcher(&root, &config) => match started {
            Ok(watcher) => Some(watcher),
            Err(reason) => {
                degrade(&hub, &root, reason);
                None
            }
        },
    };

    let mut normalizer = ChangeNormalizer::new(config.debounce());

    loop {
        let deadline = normalizer.next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => break,

            raw = next_raw(&mut watcher) => match raw {
                Some(raw) => normalizer.record(raw.path),
                None => {
                    watcher = None;
                    degrade(&hub, &root, "notification thread stopped".to_string());
                }
            },

            Some(path) = record_rx.recv() => normalizer.record(path),

            _ = sleep_until_some(deadline) => {
                let captured = capture(normalizer.take_ready()).await;
                let Some(hub) = hub.upgrade() else { break };
                for event in normalizer.settle(captured, |path| hub.take_origin(path)) {
                    crate::debug_event!("hub", "change", "{:?} {}", event.kind, event.path.display());
                    hub.broadcast_from(&root, ServerMessage::from(event));
                }
            }
        }
    }

    crate::debug_event!("watcher", "stopped", "{}", root.display());
}

async fn start_watcher(root: &Path, config: &WatchConfig) -> Result<FsWatcher, String> {
    let root = root.to_path_buf();
    let config = config.clone();

    let watcher = tokio::task::spawn_blocking(move || FsWatcher::watch(&root, &config))
        .await
        .map_err(|e| format!("watch setup panicked: {e}"))?
        .map_err(|e| e.to_string())?;

    crate::log_event!(
        "watcher",
        "started",
        "{} ({})",
        watcher.root().display(),
        if watcher.is_polling() { "polling" } else { "native" }
    );
    Ok(watcher)
}

/// Fingerprint settled paths on the blocking pool; hashing a large file
/// must not hold up connection tasks.
async fn capture(paths: Vec<PathBuf>) -> Vec<(PathBuf, FileFingerprint)> {
    if paths.is_empty() {
        return Vec::new();
    }
    match tokio::task::spawn_blocking(move || FileFingerprint::capture_all(paths)).await {
        Ok(captured) => captured,
        Err(e) => {
            tracing::warn!("[hub] fingerprinting failed, dropping settled paths: {e}");
            Vec::new()
        }
    }
}

fn degrade(hub: &WeakHub, root: &Path, reason: String) {
    if let Some(hub) = hub.upgrade() {
        hub.degrade(root, reason);
    }
}

async fn next_raw(watcher: &mut Option<FsWatcher>) -> Option<RawEvent> {
    match watcher {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
