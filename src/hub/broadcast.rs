//! Connection registry and fan-out.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::{Settings, WatchConfig};
use crate::protocol::{ClientMessage, OriginTag, ServerMessage, now_ms};

use super::error::{HubError, HubResult};
use super::origin::OriginClaims;
use super::subscription::WatchSubscription;

/// Hub-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub max_connections: usize,
    pub send_queue_capacity: usize,
    pub watch: WatchConfig,
}

impl HubSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_connections: settings.server.max_connections,
            send_queue_capacity: settings.server.send_queue_capacity.max(1),
            watch: settings.watch.clone(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// What a client presents when it connects.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Directory the client displays; events outside it are not delivered.
    pub root: PathBuf,
}

struct ConnectionEntry {
    root: PathBuf,
    tx: mpsc::Sender<ServerMessage>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    subscriptions: HashMap<PathBuf, WatchSubscription>,
}

struct HubInner {
    settings: HubSettings,
    next_id: AtomicU64,
    // Connections and watch subscriptions change together under one lock
    state: Mutex<HubState>,
    origins: Mutex<OriginClaims>,
}

/// Server-side owner of all connections and watch subscriptions.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Non-owning handle held by watch tasks and connections.
#[derive(Clone)]
pub struct WeakHub {
    inner: Weak<HubInner>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }
}

impl Hub {
    pub fn new(settings: HubSettings) -> Self {
        let origins = OriginClaims::new(settings.watch.origin_ttl());
        Self {
            inner: Arc::new(HubInner {
                settings,
                next_id: AtomicU64::new(1),
                state: Mutex::new(HubState::default()),
                origins: Mutex::new(origins),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// Attach a new connection, starting a watch on its root if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn accept(&self, handshake: Handshake) -> HubResult<Connection> {
        let root = canonical_root(&handshake.root)?;
        let settings = &self.inner.settings;

        let mut state = self.inner.state.lock();
        let current = state.connections.len();
        if current >= settings.max_connections {
            tracing::warn!(
                "[hub] rejecting connection for {}: {current}/{} connections",
                root.display(),
                settings.max_connections
            );
            return Err(HubError::Rejected {
                current,
                max: settings.max_connections,
            });
        }

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(settings.send_queue_capacity);
        let created_at = SystemTime::now();

        match state.subscriptions.get_mut(&root) {
            Some(subscription) => {
                subscription.refs += 1;
                if let Some(reason) = &subscription.degraded {
                    // Late joiners still learn the root is unobserved
                    let _ = tx.try_send(ServerMessage::watch_unavailable(&root, Some(reason.clone())));
                }
            }
            None => {
                let subscription =
                    WatchSubscription::start(self.downgrade(), root.clone(), settings.watch.clone());
                state.subscriptions.insert(root.clone(), subscription);
            }
        }

        state.connections.insert(
            id,
            ConnectionEntry {
                root: root.clone(),
                tx,
            },
        );

        crate::log_event!(
            "hub",
            "accepted",
            "{id} for {} ({} active)",
            root.display(),
            state.connections.len()
        );

        Ok(Connection {
            id,
            root,
            created_at,
            rx,
            hub: self.downgrade(),
        })
    }

    /// Detach a connection. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.inner.state.lock().remove_connection(id);
        if removed {
            crate::debug_event!("hub", "disconnected", "{id}");
        }
        removed
    }

    /// Deliver `message` to every connection whose root contains its path.
    ///
    /// Connections that are gone or cannot keep up are dropped; the rest
    /// still receive the message. Returns the number of deliveries.
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let Some(path) = message.path().map(Path::to_path_buf) else {
            return 0;
        };
        let mut state = self.inner.state.lock();
        state.deliver(&message, |_, root| path.starts_with(root))
    }

    /// Deliver to the connections attached to the watch on `root`.
    pub(crate) fn broadcast_from(&self, root: &Path, message: ServerMessage) -> usize {
        let mut state = self.inner.state.lock();
        state.deliver(&message, |_, conn_root| conn_root == root)
    }

    /// Apply a message received from connection `id`.
    pub fn handle_client_message(&self, id: ConnectionId, message: ClientMessage) -> HubResult<()> {
        let root = self
            .inner
            .state
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.root.clone())
            .ok_or(HubError::UnknownConnection(id))?;

        match message {
            ClientMessage::ContentChanged {
                path, origin_tag, ..
            } => {
                let path = canonical_path(&path);
                ensure_within(&root, &path)?;
                crate::debug_event!("hub", "origin claim", "{} by {origin_tag}", path.display());
                self.claim_origin(path, origin_tag);
            }
            ClientMessage::TabSyncRequest {
                path, origin_tag, ..
            } => {
                let path = canonical_path(&path);
                ensure_within(&root, &path)?;
                let delivered = self.broadcast(ServerMessage::TabSyncRequest {
                    path,
                    origin_tag: Some(origin_tag),
                    timestamp: now_ms(),
                });
                crate::debug_event!("hub", "tab sync relayed", "to {delivered} connections");
            }
            ClientMessage::ContentChangedAck {
                path, origin_tag, ..
            } => {
                crate::debug_event!("hub", "ack", "{} from {origin_tag}", path.display());
            }
            ClientMessage::Ping { .. } => {
                self.send_to(id, ServerMessage::Pong { timestamp: now_ms() });
            }
        }
        Ok(())
    }

    /// Record that `tag` just wrote `path` and restart the path's debounce,
    /// so the next event for it carries the tag even if the OS missed the write.
    pub fn claim_origin(&self, path: PathBuf, tag: OriginTag) {
        {
            let mut origins = self.inner.origins.lock();
            origins.prune();
            origins.claim(path.clone(), tag);
        }

        let state = self.inner.state.lock();
        for (root, subscription) in &state.subscriptions {
            if path.starts_with(root) {
                subscription.record(path.clone());
            }
        }
    }

    pub(crate) fn take_origin(&self, path: &Path) -> Option<OriginTag> {
        self.inner.origins.lock().take(path)
    }

    /// Mark `root` unobservable and tell its connections, once.
    pub(crate) fn degrade(&self, root: &Path, reason: String) {
        let mut state = self.inner.state.lock();
        let Some(subscription) = state.subscriptions.get_mut(root) else {
            return;
        };
        if subscription.degraded.is_some() {
            return;
        }
        subscription.degraded = Some(reason.clone());

        tracing::warn!("[hub] watch unavailable for {}: {reason}", root.display());
        let message = ServerMessage::watch_unavailable(root, Some(reason));
        state.deliver(&message, |_, conn_root| conn_root == root);
    }

    fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        let mut state = self.inner.state.lock();
        state.deliver(&message, |conn, _| conn == id);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Roots with a live watch subscription.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<_> = self.inner.state.lock().subscriptions.keys().cloned().collect();
        roots.sort();
        roots
    }
}

impl HubState {
    fn deliver(&mut self, message: &ServerMessage, wants: impl Fn(ConnectionId, &Path) -> bool) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, entry) in &self.connections {
            if !wants(*id, &entry.root) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("[hub] {id} send queue full, dropping connection");
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    crate::debug_event!("hub", "gone", "{id}");
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            self.remove_connection(id);
        }
        delivered
    }

    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(entry) = self.connections.remove(&id) else {
            return false;
        };

        if let Some(subscription) = self.subscriptions.get_mut(&entry.root) {
            subscription.refs = subscription.refs.saturating_sub(1);
            if subscription.refs == 0 {
                // Dropping the subscription stops its watch task
                self.subscriptions.remove(&entry.root);
                crate::log_event!("hub", "unwatched", "{}", entry.root.display());
            }
        }
        true
    }
}

/// One attached client, as seen by the transport layer.
///
/// Dropping it detaches the connection from the hub.
pub struct Connection {
    id: ConnectionId,
    root: PathBuf,
    created_at: SystemTime,
    rx: mpsc::Receiver<ServerMessage>,
    hub: WeakHub,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Next outbound message; `None` once the hub has dropped this connection.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.disconnect(self.id);
        }
    }
}

fn canonical_root(root: &Path) -> HubResult<PathBuf> {
    let canonical = root.canonicalize().map_err(|e| HubError::InvalidRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(HubError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(canonical)
}

/// Canonical form of `path`, resolving through the parent when the file
/// itself does not exist yet.
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn ensure_within(root: &Path, path: &Path) -> HubResult<()> {
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(HubError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unavailable(root: &Path) -> ServerMessage {
        ServerMessage::WatchUnavailable {
            path: root.to_path_buf(),
            reason: Some("watch limit reached".to_string()),
            timestamp: 0,
        }
    }

    fn same_kind(message: Option<ServerMessage>, expected: &ServerMessage) -> bool {
        match (message, expected) {
            (
                Some(ServerMessage::WatchUnavailable { path, reason, .. }),
                ServerMessage::WatchUnavailable {
                    path: want_path,
                    reason: want_reason,
                    ..
                },
            ) => &path == want_path && &reason == want_reason,
            _ => false,
        }
    }

    #[tokio::test]
    async fn test_degraded_root_is_announced_once_and_replayed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let hub = Hub::new(HubSettings::default());

        let mut early = hub.accept(Handshake { root: root.clone() }).unwrap();
        hub.degrade(&root, "watch limit reached".to_string());
        hub.degrade(&root, "something else".to_string());

        assert!(same_kind(early.try_recv(), &unavailable(&root)));
        assert!(early.try_recv().is_none());

        let mut late = hub.accept(Handshake { root: root.clone() }).unwrap();
        assert!(same_kind(late.try_recv(), &unavailable(&root)));
    }

    #[test]
    fn test_canonical_path_of_missing_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let dotted = dir.path().join(".").join("new.txt");
        assert_eq!(canonical_path(&dotted), root.join("new.txt"));
        assert!(ensure_within(&root, &canonical_path(&dotted)).is_ok());
        assert!(ensure_within(&root, Path::new("/elsewhere/new.txt")).is_err());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }
}
