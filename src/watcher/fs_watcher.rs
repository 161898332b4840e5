//! Recursive watch of one root directory.
//!
//! Native notifications (inotify, FSEvents, ReadDirectoryChangesW) are used
//! when they initialize; otherwise the watch falls back to polling. Events
//! are delivered from notify's own thread through a bounded channel.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::WatchConfig;

use super::error::WatchError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Raw notification kind, before debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Created,
    Modified,
    Removed,
}

/// One raw notification for a path inside the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
}

impl RawEvent {
    fn new(kind: RawKind, path: PathBuf) -> Self {
        let mtime = std::fs::metadata(&path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        Self { kind, path, mtime }
    }
}

enum Backend {
    Native(RecommendedWatcher),
    Polling(PollWatcher),
}

impl Backend {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(w) => w.watch(path, RecursiveMode::Recursive),
            Backend::Polling(w) => w.watch(path, RecursiveMode::Recursive),
        }
    }

    fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(w) => w.unwatch(path),
            Backend::Polling(w) => w.unwatch(path),
        }
    }
}

/// Watches a root directory recursively and yields [`RawEvent`]s.
///
/// Dropping the watcher releases the OS-level watch.
pub struct FsWatcher {
    root: PathBuf,
    backend: Backend,
    event_rx: mpsc::Receiver<notify::Result<Vec<RawEvent>>>,
    queue: VecDeque<RawEvent>,
    armed: bool,
    rearm_interval: Duration,
}

impl FsWatcher {
    /// Start watching `root`.
    ///
    /// This may scan the tree (polling backend), so call it off the async
    /// executor, e.g. from `spawn_blocking`.
    pub fn watch(root: &Path, config: &WatchConfig) -> Result<Self, WatchError> {
        let root = root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| WatchError::RootMissing {
                root: root.to_path_buf(),
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let backend = start_backend(&root, config, tx)?;

        Ok(Self {
            root,
            backend,
            event_rx: rx,
            queue: VecDeque::new(),
            armed: true,
            rearm_interval: config.rearm_interval(),
        })
    }

    /// Canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.backend, Backend::Polling(_))
    }

    /// Next raw event, or `None` once the notification thread has gone away.
    ///
    /// Cancel-safe: dropping the future loses no events.
    pub async fn next(&mut self) -> Option<RawEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }

            if !self.armed {
                tokio::time::sleep(self.rearm_interval).await;
                self.try_rearm();
                continue;
            }

            match self.event_rx.recv().await {
                Some(Ok(batch)) => self.ingest(batch),
                Some(Err(e)) => {
                    tracing::warn!("[watcher] notification error under {}: {e}", self.root.display());
                    if !self.root.is_dir() {
                        self.disarm();
                    }
                }
                None => return None,
            }
        }
    }

    fn ingest(&mut self, batch: Vec<RawEvent>) {
        let mut removals = false;
        for event in batch {
            if event.kind == RawKind::Removed {
                if event.path == self.root {
                    self.queue.push_back(event);
                    self.disarm();
                    return;
                }
                removals = true;
            }
            self.queue.push_back(event);
        }

        // Removing the root's parent chain often surfaces only as child removals
        if removals && !self.root.is_dir() {
            self.disarm();
        }
    }

    fn disarm(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let _ = self.backend.unwatch(&self.root);
        tracing::warn!("[watcher] root removed, waiting to re-arm: {}", self.root.display());
    }

    fn try_rearm(&mut self) {
        if !self.root.is_dir() {
            return;
        }
        match self.backend.watch(&self.root) {
            Ok(()) => {
                self.armed = true;
                crate::log_event!("watcher", "rearmed", "{}", self.root.display());
                // Let viewers re-list the tree that came back
                self.queue
                    .push_back(RawEvent::new(RawKind::Created, self.root.clone()));
            }
            Err(e) => {
                crate::debug_event!("watcher", "rearm failed", "{}: {e}", self.root.display());
            }
        }
    }
}

fn start_backend(
    root: &Path,
    config: &WatchConfig,
    tx: mpsc::Sender<notify::Result<Vec<RawEvent>>>,
) -> Result<Backend, WatchError> {
    let native_error = if config.force_polling {
        "polling forced by configuration".to_string()
    } else {
        let native_tx = tx.clone();
        let native_root = root.to_path_buf();
        let native = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = native_tx.blocking_send(res.map(|event| translate(&native_root, event)));
            },
            notify::Config::default(),
        )
        .and_then(|mut watcher| watcher.watch(root, RecursiveMode::Recursive).map(|_| watcher));

        match native {
            Ok(watcher) => {
                crate::debug_event!("watcher", "native", "{}", root.display());
                return Ok(Backend::Native(watcher));
            }
            Err(e) => {
                tracing::warn!(
                    "[watcher] native watch failed for {}: {e}, falling back to polling",
                    root.display()
                );
                e.to_string()
            }
        }
    };

    let poll_config = notify::Config::default()
        .with_poll_interval(config.poll_interval())
        .with_compare_contents(false);

    let poll_root = root.to_path_buf();
    PollWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res.map(|event| translate(&poll_root, event)));
        },
        poll_config,
    )
    .and_then(|mut watcher| watcher.watch(root, RecursiveMode::Recursive).map(|_| watcher))
    .map(|watcher| {
        crate::debug_event!("watcher", "polling", "{}", root.display());
        Backend::Polling(watcher)
    })
    .map_err(|e| WatchError::unavailable(root, format!("native: {native_error}; polling: {e}")))
}

/// Map one notify event to raw events under `root`.
///
/// Runs on notify's thread, so the stat and symlink resolution per path stay
/// off the async executor.
fn translate(root: &Path, event: Event) -> Vec<RawEvent> {
    let mut paths = event.paths.into_iter();
    let mapped: Vec<(RawKind, PathBuf)> = match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(|p| (RawKind::Created, p)).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(|p| (RawKind::Removed, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut pairs: Vec<_> = paths
                .next()
                .map(|p| (RawKind::Removed, p))
                .into_iter()
                .collect();
            pairs.extend(paths.map(|p| (RawKind::Created, p)));
            pairs
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            paths.map(|p| (RawKind::Modified, p)).collect()
        }
    };

    mapped
        .into_iter()
        .filter(|(kind, path)| {
            let keep = (*kind == RawKind::Removed && path == root) || resolves_within(root, path);
            if !keep {
                crate::debug_event!("watcher", "outside root", "{}", path.display());
            }
            keep
        })
        .map(|(kind, path)| RawEvent::new(kind, path))
        .collect()
}

/// True when `path` lies under `root` after resolving symlinks.
///
/// Paths that no longer exist are judged by their parent directory.
pub fn resolves_within(root: &Path, path: &Path) -> bool {
    if !path.starts_with(root) {
        return false;
    }

    let resolved = match path.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => match parent.canonicalize() {
                Ok(parent) => parent.join(name),
                // Parent vanished too; the lexical check above is all we have
                Err(_) => return true,
            },
            _ => return true,
        },
    };

    resolved.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> WatchConfig {
        WatchConfig {
            poll_interval_ms: 50,
            rearm_interval_ms: 50,
            ..WatchConfig::default()
        }
    }

    #[test]
    fn test_resolves_within_plain_paths() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), "x").unwrap();

        assert!(resolves_within(&root, &root.join("a.txt")));
        assert!(resolves_within(&root, &root.join("deleted.txt")));
        assert!(!resolves_within(&root, Path::new("/definitely/elsewhere")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let outside = TempDir::new().unwrap();
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, "s").unwrap();

        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let link = root.join("link.txt");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        assert!(!resolves_within(&root, &link));
    }

    #[test]
    fn test_translate_splits_renames_and_drops_outsiders() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("new.txt"), "x").unwrap();

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("old.txt"))
            .add_path(root.join("new.txt"));
        let events = translate(&root, rename);
        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.path.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (RawKind::Removed, root.join("old.txt")),
                (RawKind::Created, root.join("new.txt")),
            ]
        );
        assert!(events[0].mtime.is_none());
        assert!(events[1].mtime.is_some());

        let outside = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/definitely/elsewhere.txt"));
        assert!(translate(&root, outside).is_empty());

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(root.join("new.txt"));
        assert!(translate(&root, access).is_empty());
    }

    #[test]
    fn test_missing_root_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = FsWatcher::watch(&missing, &test_config()).err().unwrap();
        assert!(matches!(err, WatchError::RootMissing { .. }));
    }

    #[tokio::test]
    async fn test_forced_polling_reports_writes() {
        let dir = TempDir::new().unwrap();
        let config = WatchConfig {
            force_polling: true,
            ..test_config()
        };
        let root = dir.path().to_path_buf();
        let mut watcher = tokio::task::spawn_blocking(move || FsWatcher::watch(&root, &config))
            .await
            .unwrap()
            .unwrap();
        assert!(watcher.is_polling());

        let file = watcher.root().join("new.txt");
        fs::write(&file, "content").unwrap();

        // The root directory itself may be reported first
        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = watcher.next().await.unwrap();
                if event.path == file {
                    return event;
                }
            }
        })
        .await
        .expect("poll watcher should report the new file");
        assert!(event.mtime.is_some());
    }
}
