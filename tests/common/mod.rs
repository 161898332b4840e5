//! In-memory stand-ins for the hub connection, file API and editor surface.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tabsync::client::{
    ClientError, Connector, DocumentSurface, Link, LinkFrame, Notice, Selection, Subscription,
    TextBuffer,
};
use tabsync::config::ClientConfig;
use tabsync::files::{FileApi, FileApiError, FileApiResult, FileContent, FileTree, TreeEntry};
use tabsync::protocol::{CLOSE_TOO_MANY_CONNECTIONS, ClientMessage, ServerMessage};
use tabsync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject,
    Refuse,
}

/// Scripted hub shared between a test and the connector it hands out.
pub struct FakeHub {
    pub connects: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub admission: Mutex<Admission>,
    pub sent: Arc<Mutex<Vec<ClientMessage>>>,
    server_side: Mutex<Option<mpsc::UnboundedSender<LinkFrame>>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            admission: Mutex::new(Admission::Accept),
            sent: Arc::new(Mutex::new(Vec::new())),
            server_side: Mutex::new(None),
        })
    }

    pub fn connector(self: &Arc<Self>) -> FakeConnector {
        FakeConnector(self.clone())
    }

    pub fn set_admission(&self, admission: Admission) {
        *self.admission.lock() = admission;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn live_links(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Push a message to the currently connected client.
    pub fn push(&self, message: ServerMessage) -> bool {
        match self.server_side.lock().as_ref() {
            Some(tx) => tx.send(LinkFrame::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Drop the current link from the hub side.
    pub fn drop_link(&self) {
        self.server_side.lock().take();
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }
}

pub struct FakeConnector(Arc<FakeHub>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, ClientError> {
        let hub = &self.0;
        hub.connects.fetch_add(1, Ordering::SeqCst);

        let admission = *hub.admission.lock();
        if admission == Admission::Refuse {
            return Err(ClientError::Connect {
                url: "fake://hub".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if admission == Admission::Reject {
            let _ = tx.send(LinkFrame::Closed {
                code: Some(CLOSE_TOO_MANY_CONNECTIONS),
                reason: "too many connections".to_string(),
            });
        } else {
            *hub.server_side.lock() = Some(tx);
        }

        hub.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLink {
            frames: rx,
            sent: hub.sent.clone(),
            live: hub.live.clone(),
        }))
    }
}

struct FakeLink {
    frames: mpsc::UnboundedReceiver<LinkFrame>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl Link for FakeLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn next(&mut self) -> LinkFrame {
        self.frames.recv().await.unwrap_or(LinkFrame::Closed {
            code: None,
            reason: "hub went away".to_string(),
        })
    }

    async fn close(&mut self) {}
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Client config with keepalive off so paused-time tests stay quiet.
pub fn quiet_client_config() -> ClientConfig {
    ClientConfig {
        ping_interval_ms: 0,
        ..ClientConfig::default()
    }
}

/// Next hub message, skipping status notices.
pub async fn next_message(subscription: &mut Subscription) -> ServerMessage {
    loop {
        match subscription.recv().await {
            Some(Notice::Message(message)) => return message,
            Some(Notice::Status(_)) => continue,
            None => panic!("subscription closed"),
        }
    }
}

/// Poll `condition` until it holds, failing after `limit`.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// File API over an in-memory map.
#[derive(Default)]
pub struct FakeFiles {
    pub contents: Mutex<HashMap<PathBuf, String>>,
    pub reads: AtomicUsize,
    /// Reads that never complete, consumed one per read.
    pub stall_reads: AtomicUsize,
    /// Reads that fail, consumed one per read after stalls.
    pub fail_reads: AtomicUsize,
}

impl FakeFiles {
    pub fn with(files: &[(&str, &str)]) -> Arc<Self> {
        let fake = Self::default();
        for (path, content) in files {
            fake.set(path, content);
        }
        Arc::new(fake)
    }

    pub fn set(&self, path: &str, content: &str) {
        self.contents
            .lock()
            .insert(PathBuf::from(path), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.contents.lock().remove(Path::new(path));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl FileApi for FakeFiles {
    async fn list(&self, path: &Path) -> FileApiResult<FileTree> {
        let mut tree: Vec<_> = self
            .contents
            .lock()
            .keys()
            .filter(|p| p.starts_with(path))
            .map(|p| TreeEntry {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: p.clone(),
                is_directory: false,
                children: None,
            })
            .collect();
        tree.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(FileTree {
            root_path: path.to_path_buf(),
            tree,
        })
    }

    async fn read(&self, path: &Path) -> FileApiResult<FileContent> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.stall_reads) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.fail_reads) {
            return Err(FileApiError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("file is locked"),
            });
        }
        let content = self
            .contents
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| FileApiError::NotFound(path.to_path_buf()))?;
        Ok(FileContent {
            path: path.to_path_buf(),
            content,
            is_binary: false,
        })
    }

    async fn write(&self, path: &Path, content: &str) -> FileApiResult<()> {
        self.contents
            .lock()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Render(String),
    Patch,
    Tree(usize),
    Clear,
    Notify(SyncError),
}

#[derive(Debug, Default)]
pub struct Buffer {
    pub text: String,
    pub selection: Selection,
    pub undo: Vec<String>,
}

impl TextBuffer for Buffer {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn replace_all(&mut self, text: &str) {
        let previous = std::mem::replace(&mut self.text, text.to_string());
        self.undo.push(previous);
    }

    fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }
}

/// Records what the engine asked the view to do.
#[derive(Default)]
pub struct FakeSurface {
    pub buffer: Mutex<Buffer>,
    pub calls: Mutex<Vec<SurfaceCall>>,
}

impl FakeSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    pub fn text(&self) -> String {
        self.buffer.lock().text.clone()
    }

    pub fn set_selection(&self, selection: Selection) {
        self.buffer.lock().selection = selection;
    }

    pub fn selection(&self) -> Selection {
        self.buffer.lock().selection
    }

    pub fn patches(&self) -> usize {
        self.calls().iter().filter(|c| **c == SurfaceCall::Patch).count()
    }
}

impl DocumentSurface for FakeSurface {
    fn render_document(&self, content: &FileContent) {
        let mut buffer = self.buffer.lock();
        buffer.text = content.content.clone();
        buffer.selection = Selection::default();
        buffer.undo.clear();
        self.calls.lock().push(SurfaceCall::Render(content.content.clone()));
    }

    fn edit_buffer(&self, edit: &mut dyn FnMut(&mut dyn TextBuffer)) {
        let mut buffer = self.buffer.lock();
        edit(&mut *buffer);
        self.calls.lock().push(SurfaceCall::Patch);
    }

    fn render_tree(&self, tree: &FileTree) {
        self.calls.lock().push(SurfaceCall::Tree(tree.entry_count()));
    }

    fn clear_document(&self) {
        self.buffer.lock().text.clear();
        self.calls.lock().push(SurfaceCall::Clear);
    }

    fn notify(&self, error: &SyncError) {
        self.calls.lock().push(SurfaceCall::Notify(error.clone()));
    }
}
