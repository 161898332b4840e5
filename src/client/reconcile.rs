//! Reconciliation engine: turns hub events into view updates.
//!
//! One engine drives one view (a tree plus at most one open document). It
//! never writes files; it re-reads through [`FileApi`] and updates the
//! view through [`DocumentSurface`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionManager, ConnectionState, Notice};
use super::ReconcileError;
use super::cursor::{Selection, remap_selection};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::files::{FileApi, FileContent, FileTree};
use crate::protocol::{ClientMessage, OriginTag, ServerMessage};

/// A text editor buffer, as seen during a hot-patch.
pub trait TextBuffer {
    fn text(&self) -> String;

    fn selection(&self) -> Selection;

    /// Replace the whole text as one undoable edit.
    fn replace_all(&mut self, text: &str);

    fn set_selection(&mut self, selection: Selection);
}

/// The view an engine drives.
///
/// Implementations must not call back into the engine from these methods.
pub trait DocumentSurface: Send + Sync {
    /// Discard the displayed document and show `content` from scratch.
    fn render_document(&self, content: &FileContent);

    /// Run `edit` on the live buffer with user input held off.
    fn edit_buffer(&self, edit: &mut dyn FnMut(&mut dyn TextBuffer));

    fn render_tree(&self, tree: &FileTree);

    fn clear_document(&self);

    fn notify(&self, error: &SyncError);
}

/// What an event means for the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Ignore,
    HotPatch(PathBuf),
    RefreshTree,
    ExternalDelete(PathBuf),
    WatchUnavailable { root: PathBuf, reason: String },
}

/// The parts of view state the decision depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewSnapshot<'a> {
    pub tree_root: Option<&'a Path>,
    pub document: Option<&'a Path>,
}

/// Decide what `message` means for a view owned by `local`.
pub fn decide(message: &ServerMessage, local: &OriginTag, view: ViewSnapshot<'_>) -> ReconcileAction {
    let is_document = |path: &Path| view.document == Some(path);
    let in_tree = |path: &Path| view.tree_root.is_some_and(|root| path.starts_with(root));
    let from_self = |origin: &Option<OriginTag>| origin.as_ref() == Some(local);

    match message {
        ServerMessage::ContentChanged { path, origin_tag, .. } if is_document(path) => {
            if from_self(origin_tag) {
                ReconcileAction::Ignore
            } else {
                ReconcileAction::HotPatch(path.clone())
            }
        }
        ServerMessage::ContentChanged { path, .. } if in_tree(path) => ReconcileAction::RefreshTree,

        ServerMessage::Deleted { path, .. } if is_document(path) => {
            ReconcileAction::ExternalDelete(path.clone())
        }
        ServerMessage::Deleted { path, .. } if in_tree(path) => ReconcileAction::RefreshTree,

        ServerMessage::TabSyncRequest { path, origin_tag, .. }
            if is_document(path) && !from_self(origin_tag) =>
        {
            ReconcileAction::HotPatch(path.clone())
        }

        ServerMessage::WatchUnavailable { path, reason, .. }
            if view
                .tree_root
                .is_some_and(|root| root.starts_with(path) || path.starts_with(root)) =>
        {
            ReconcileAction::WatchUnavailable {
                root: path.clone(),
                reason: reason.clone().unwrap_or_else(|| "watch failed".to_string()),
            }
        }

        _ => ReconcileAction::Ignore,
    }
}

struct OpenDocument {
    path: PathBuf,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ViewState {
    tree_root: Option<PathBuf>,
    document: Option<OpenDocument>,
    generation: u64,
    // Paths deleted externally while open; no further saves are announced
    tombstones: HashSet<PathBuf>,
    rejected: bool,
}

struct EngineInner {
    files: Arc<dyn FileApi>,
    surface: Arc<dyn DocumentSurface>,
    manager: ConnectionManager,
    origin: OriginTag,
    fetch_timeout: Duration,
    state: Mutex<ViewState>,
}

/// Per-view reconciliation. Cheap to clone.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    pub fn new(
        files: Arc<dyn FileApi>,
        surface: Arc<dyn DocumentSurface>,
        manager: ConnectionManager,
        config: &ClientConfig,
    ) -> Self {
        Self::with_origin(files, surface, manager, config, OriginTag::generate())
    }

    pub fn with_origin(
        files: Arc<dyn FileApi>,
        surface: Arc<dyn DocumentSurface>,
        manager: ConnectionManager,
        config: &ClientConfig,
        origin: OriginTag,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                files,
                surface,
                manager,
                origin,
                fetch_timeout: config.fetch_timeout(),
                state: Mutex::new(ViewState::default()),
            }),
        }
    }

    /// This view's origin tag.
    pub fn origin(&self) -> &OriginTag {
        &self.inner.origin
    }

    pub fn open_path(&self) -> Option<PathBuf> {
        self.inner.state.lock().document.as_ref().map(|doc| doc.path.clone())
    }

    pub fn tree_root(&self) -> Option<PathBuf> {
        self.inner.state.lock().tree_root.clone()
    }

    /// Subscribe to the connection manager and handle notices until the
    /// returned handle is stopped or dropped.
    pub fn listen(&self) -> ListenerHandle {
        let mut subscription = self.inner.manager.subscribe();
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let stop = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    notice = subscription.recv() => match notice {
                        Some(notice) => engine.handle(notice).await,
                        None => break,
                    },
                }
            }
            subscription.unsubscribe();
        });

        ListenerHandle {
            cancel,
            handle: Some(handle),
        }
    }

    /// Apply one notice. Never fails; problems degrade to a reload or a
    /// surface notification.
    pub async fn handle(&self, notice: Notice) {
        match notice {
            Notice::Status(state) => {
                crate::debug_event!("reconcile", "connection", "{state:?}");
                let rejected = state == ConnectionState::Rejected;
                let was_rejected = std::mem::replace(&mut self.inner.state.lock().rejected, rejected);
                if rejected && !was_rejected {
                    self.report(SyncError::ConnectionRejected {
                        retry_after: self.inner.manager.cooldown_remaining(),
                    });
                }
            }
            Notice::Message(message) => self.handle_message(&message).await,
        }
    }

    pub async fn handle_message(&self, message: &ServerMessage) {
        let action = {
            let state = self.inner.state.lock();
            let view = ViewSnapshot {
                tree_root: state.tree_root.as_deref(),
                document: state.document.as_ref().map(|doc| doc.path.as_path()),
            };
            decide(message, &self.inner.origin, view)
        };

        match action {
            ReconcileAction::Ignore => {}
            ReconcileAction::HotPatch(path) => self.hot_patch(&path).await,
            ReconcileAction::RefreshTree => self.refresh_tree().await,
            ReconcileAction::ExternalDelete(path) => self.external_delete(path).await,
            ReconcileAction::WatchUnavailable { root, reason } => {
                self.report(SyncError::WatchUnavailable { root, reason });
            }
        }
    }

    /// Display the tree under `root`.
    ///
    /// Hub events name canonical paths, so the view adopts the root as the
    /// file API resolved it rather than as given.
    pub async fn show_tree(&self, root: &Path) -> Result<FileTree, SyncError> {
        self.inner.state.lock().tree_root = Some(root.to_path_buf());
        let tree = self.fetch_tree(root).await?;

        let mut state = self.inner.state.lock();
        if state.tree_root.as_deref() == Some(root) {
            state.tree_root = Some(tree.root_path.clone());
            self.inner.surface.render_tree(&tree);
        }
        Ok(tree)
    }

    /// Open `path`, cancelling any in-flight work for the previous document.
    ///
    /// Once read, the document is tracked under the path the file API
    /// reports for it.
    pub async fn open_document(&self, path: &Path) -> Result<(), SyncError> {
        let (generation, cancel) = {
            let mut state = self.inner.state.lock();
            if let Some(previous) = state.document.take() {
                previous.cancel.cancel();
            }
            state.generation += 1;
            state.tombstones.remove(path);
            let document = OpenDocument {
                path: path.to_path_buf(),
                generation: state.generation,
                cancel: CancellationToken::new(),
            };
            let handles = (document.generation, document.cancel.clone());
            state.document = Some(document);
            handles
        };

        let content = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            fetched = self.fetch(path) => fetched?,
        };

        let mut state = self.inner.state.lock();
        if is_current(&state, generation) {
            state.tombstones.remove(&content.path);
            if let Some(document) = state.document.as_mut() {
                document.path = content.path.clone();
            }
            self.inner.surface.render_document(&content);
        }
        Ok(())
    }

    pub fn close_document(&self) {
        let closed = self.inner.state.lock().document.take();
        if let Some(document) = closed {
            document.cancel.cancel();
            self.inner.surface.clear_document();
        }
    }

    /// Fails for paths removed externally while they were open.
    pub fn check_writable(&self, path: &Path) -> Result<(), SyncError> {
        if self.inner.state.lock().tombstones.contains(path) {
            return Err(ReconcileError::ExternalDelete {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    /// Tell the hub this view just wrote `path`, so the resulting change
    /// event is tagged with our origin.
    pub fn announce_save(&self, path: &Path) -> Result<bool, SyncError> {
        self.check_writable(path)?;
        Ok(self
            .inner
            .manager
            .send(ClientMessage::content_changed(path, self.inner.origin.clone())))
    }

    /// Ask other views showing `path` to re-read it.
    pub fn request_tab_sync(&self, path: &Path) -> bool {
        self.inner
            .manager
            .send(ClientMessage::tab_sync_request(path, self.inner.origin.clone()))
    }

    /// Manual retry after a rejection.
    pub fn retry_connection(&self) -> Result<(), SyncError> {
        self.inner.manager.retry().map_err(SyncError::from)
    }

    async fn hot_patch(&self, path: &Path) {
        let Some((generation, cancel)) = self.current_document(path) else {
            return;
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                crate::debug_event!("reconcile", "hot-patch superseded", "{}", path.display());
                return;
            }
            fetched = self.fetch(path) => fetched,
        };

        match fetched {
            Ok(content) if !content.is_binary => self.apply_patch(generation, &content),
            Ok(content) => {
                let state = self.inner.state.lock();
                if is_current(&state, generation) {
                    self.inner.surface.render_document(&content);
                }
            }
            Err(e) => {
                tracing::warn!("[reconcile] hot-patch fetch failed, reloading: {e}");
                self.reload(path, generation, &cancel).await;
            }
        }
    }

    fn apply_patch(&self, generation: u64, content: &FileContent) {
        // Holding the state lock keeps a document switch from interleaving
        let state = self.inner.state.lock();
        if !is_current(&state, generation) {
            crate::debug_event!("reconcile", "discarding late content", "{}", content.path.display());
            return;
        }

        let new_text = content.content.as_str();
        self.inner.surface.edit_buffer(&mut |buffer: &mut dyn TextBuffer| {
            let old_text = buffer.text();
            if old_text == new_text {
                return;
            }
            let selection = buffer.selection();
            buffer.replace_all(new_text);
            buffer.set_selection(remap_selection(selection, &old_text, new_text));
        });
        crate::debug_event!("reconcile", "hot-patched", "{}", content.path.display());
    }

    /// Full discard-and-reload after a failed hot-patch.
    async fn reload(&self, path: &Path, generation: u64, cancel: &CancellationToken) {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = self.fetch(path) => fetched,
        };

        let state = self.inner.state.lock();
        if !is_current(&state, generation) {
            return;
        }
        match fetched {
            Ok(content) => self.inner.surface.render_document(&content),
            Err(e) => {
                // The reload was the fallback; nothing is left to retry
                tracing::warn!("[reconcile] reload of {} failed: {e}", path.display());
                self.inner.surface.notify(&e);
            }
        }
    }

    async fn external_delete(&self, path: PathBuf) {
        let refresh = {
            let mut state = self.inner.state.lock();
            if let Some(document) = state.document.take() {
                document.cancel.cancel();
            }
            state.tombstones.insert(path.clone());
            state
                .tree_root
                .as_ref()
                .is_some_and(|root| path.starts_with(root))
        };

        crate::log_event!("reconcile", "removed externally", "{}", path.display());
        self.inner.surface.clear_document();
        self.report(SyncError::ExternalDelete { path });

        if refresh {
            self.refresh_tree().await;
        }
    }

    async fn refresh_tree(&self) {
        let Some(root) = self.tree_root() else {
            return;
        };
        match self.fetch_tree(&root).await {
            Ok(tree) => {
                // The root may have changed while listing
                if self.tree_root().as_deref() == Some(root.as_path()) {
                    self.inner.surface.render_tree(&tree);
                }
            }
            Err(e) => tracing::warn!("[reconcile] tree refresh failed: {e}"),
        }
    }

    /// Surface `error` when the user has to act; otherwise only log it.
    fn report(&self, error: SyncError) {
        if error.is_user_visible() {
            self.inner.surface.notify(&error);
        } else {
            tracing::warn!("[reconcile] {error}");
        }
    }

    fn current_document(&self, path: &Path) -> Option<(u64, CancellationToken)> {
        let state = self.inner.state.lock();
        state
            .document
            .as_ref()
            .filter(|doc| doc.path == path)
            .map(|doc| (doc.generation, doc.cancel.clone()))
    }

    async fn fetch(&self, path: &Path) -> Result<FileContent, SyncError> {
        let after = self.inner.fetch_timeout;
        match timeout(after, self.inner.files.read(path)).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(source)) => Err(ReconcileError::FetchFailed {
                path: path.to_path_buf(),
                source,
            }
            .into()),
            Err(_) => Err(ReconcileError::Timeout {
                path: path.to_path_buf(),
                after,
            }
            .into()),
        }
    }

    async fn fetch_tree(&self, root: &Path) -> Result<FileTree, SyncError> {
        let after = self.inner.fetch_timeout;
        match timeout(after, self.inner.files.list(root)).await {
            Ok(Ok(tree)) => Ok(tree),
            Ok(Err(source)) => Err(ReconcileError::FetchFailed {
                path: root.to_path_buf(),
                source,
            }
            .into()),
            Err(_) => Err(ReconcileError::Timeout {
                path: root.to_path_buf(),
                after,
            }
            .into()),
        }
    }
}

fn is_current(state: &ViewState, generation: u64) -> bool {
    state
        .document
        .as_ref()
        .is_some_and(|doc| doc.generation == generation)
}

/// Keeps an engine subscribed. Dropping it unsubscribes.
pub struct ListenerHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stop listening and wait for the listener task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
