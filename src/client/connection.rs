//! Process-wide connection manager.
//!
//! Every view in a process subscribes here instead of opening its own
//! connection. The manager keeps at most one live [`Link`] and only while
//! at least one [`Subscription`] exists.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected (backoff, retry)
//!                      |            |
//!                      +------------+--> Rejected (waits for retry())
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

use super::ClientError;
use super::transport::{Connector, Link, LinkFrame};
use crate::config::ClientConfig;
use crate::protocol::{CLOSE_TOO_MANY_CONNECTIONS, ClientMessage, ServerMessage};

const OUTBOUND_CAPACITY: usize = 64;

/// How long a fresh link must stay open before it counts as admitted.
const ADMISSION_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The hub refused admission; nothing happens until [`ConnectionManager::retry`].
    Rejected,
}

/// What a subscription receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Message(ServerMessage),
    Status(ConnectionState),
}

struct Worker {
    cancel: CancellationToken,
    retry: Arc<Notify>,
    _handle: JoinHandle<()>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, mpsc::Sender<Notice>>,
    worker: Option<Worker>,
    rejected_at: Option<Instant>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    listeners: Mutex<Listeners>,
    status: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    links_opened: AtomicUsize,
}

/// Shared handle to the process's single hub connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector, config: ClientConfig) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                connector: Arc::new(connector),
                config,
                listeners: Mutex::new(Listeners::default()),
                status,
                outbound: Mutex::new(None),
                links_opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Register a listener, connecting if this is the first one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let capacity = self.inner.config.listener_queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, tx);

        if listeners.worker.is_none() {
            let start_rejected = listeners
                .rejected_at
                .is_some_and(|at| at.elapsed() < self.inner.config.rejection_cooldown());
            listeners.worker = Some(spawn_worker(self.inner.clone(), start_rejected));
        }

        crate::debug_event!("client", "subscribed", "listener {id} ({} total)", listeners.entries.len());

        Subscription {
            id,
            rx,
            manager: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Send `message` over the live link.
    ///
    /// Returns false, with a warning, when not connected; nothing is queued
    /// for later delivery.
    pub fn send(&self, message: ClientMessage) -> bool {
        let outbound = self.inner.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            tracing::warn!("[client] not connected, dropping outbound {message:?}");
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[client] outbound queue unavailable, dropping message: {e}");
                false
            }
        }
    }

    /// Time left before [`retry`](Self::retry) is allowed, while rejected.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let at = self.inner.listeners.lock().rejected_at?;
        self.inner
            .config
            .rejection_cooldown()
            .checked_sub(at.elapsed())
            .filter(|left| !left.is_zero())
    }

    /// Leave the rejected state once the cooldown has passed.
    pub fn retry(&self) -> Result<(), ClientError> {
        let mut listeners = self.inner.listeners.lock();
        if let Some(at) = listeners.rejected_at {
            let cooldown = self.inner.config.rejection_cooldown();
            let elapsed = at.elapsed();
            if elapsed < cooldown {
                return Err(ClientError::CooldownActive {
                    remaining: cooldown - elapsed,
                });
            }
        }
        listeners.rejected_at = None;

        if let Some(worker) = &listeners.worker {
            crate::log_event!("client", "manual retry");
            worker.retry.notify_one();
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status.borrow()
    }

    /// Watch connection state transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }

    /// Whether the background connection task is running.
    pub fn is_active(&self) -> bool {
        self.inner.listeners.lock().worker.is_some()
    }

    /// Transport links opened over this manager's lifetime, including
    /// ones the hub refused right after opening.
    pub fn links_opened(&self) -> usize {
        self.inner.links_opened.load(Ordering::SeqCst)
    }
}

impl ManagerInner {
    fn remove_listener(&self, id: u64) {
        let stopped = {
            let mut listeners = self.listeners.lock();
            if listeners.entries.remove(&id).is_none() {
                return;
            }
            crate::debug_event!("client", "unsubscribed", "listener {id} ({} left)", listeners.entries.len());

            match listeners.worker.take() {
                Some(worker) if listeners.entries.is_empty() => {
                    worker.cancel.cancel();
                    crate::debug_event!("client", "last listener left, closing connection");
                    true
                }
                worker => {
                    listeners.worker = worker;
                    false
                }
            }
        };

        if stopped {
            *self.outbound.lock() = None;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn dispatch(&self, notice: Notice) {
        let listeners = self.listeners.lock();
        for (id, tx) in &listeners.entries {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(notice.clone()) {
                tracing::warn!("[client] listener {id} is not keeping up, dropping event");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.status.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            crate::debug_event!("client", "state", "{state:?}");
            self.dispatch(Notice::Status(state));
        }
    }

    fn mark_rejected(&self) {
        self.listeners.lock().rejected_at = Some(Instant::now());
    }
}

/// A registered listener. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Notice>,
    manager: Weak<ManagerInner>,
    active: bool,
}

impl Subscription {
    /// Next notice, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Notice> {
        if !self.active {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notice> {
        self.rx.try_recv().ok()
    }

    /// Deregister. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_listener(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

enum SessionEnd {
    Cancelled,
    Rejected,
    Lost(String),
}

fn spawn_worker(inner: Arc<ManagerInner>, start_rejected: bool) -> Worker {
    let cancel = CancellationToken::new();
    let retry = Arc::new(Notify::new());
    let handle = tokio::spawn(run_worker(inner, cancel.clone(), retry.clone(), start_rejected));
    Worker {
        cancel,
        retry,
        _handle: handle,
    }
}

async fn run_worker(
    inner: Arc<ManagerInner>,
    cancel: CancellationToken,
    retry: Arc<Notify>,
    start_rejected: bool,
) {
    let mut attempt: u32 = 0;
    let mut end = if start_rejected {
        SessionEnd::Rejected
    } else {
        connect_once(&inner, &cancel, &mut attempt).await
    };

    loop {
        match end {
            SessionEnd::Cancelled => break,
            SessionEnd::Rejected => {
                tracing::warn!("[client] hub is at capacity, not reconnecting until retry");
                inner.set_state(ConnectionState::Rejected);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = retry.notified() => attempt = 0,
                }
            }
            SessionEnd::Lost(reason) => {
                inner.set_state(ConnectionState::Disconnected);
                let delay = backoff_delay(&inner.config, attempt);
                attempt = attempt.saturating_add(1);
                crate::log_event!("client", "reconnecting", "in {delay:?} after: {reason}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }
        end = connect_once(&inner, &cancel, &mut attempt).await;
    }
}

async fn connect_once(inner: &ManagerInner, cancel: &CancellationToken, attempt: &mut u32) -> SessionEnd {
    if cancel.is_cancelled() {
        return SessionEnd::Cancelled;
    }
    inner.set_state(ConnectionState::Connecting);

    let connected = tokio::select! {
        _ = cancel.cancelled() => return SessionEnd::Cancelled,
        connected = inner.connector.connect() => connected,
    };

    match connected {
        Ok(link) => {
            *attempt = 0;
            let end = run_session(inner, link, cancel).await;
            if matches!(end, SessionEnd::Rejected) {
                inner.mark_rejected();
            }
            end
        }
        Err(ClientError::Rejected) => {
            inner.mark_rejected();
            SessionEnd::Rejected
        }
        Err(e) => SessionEnd::Lost(e.to_string()),
    }
}

async fn run_session(inner: &ManagerInner, mut link: Box<dyn Link>, cancel: &CancellationToken) -> SessionEnd {
    inner.links_opened.fetch_add(1, Ordering::SeqCst);

    // An over-capacity hub closes the socket right after the upgrade, so
    // Connected waits for the first frame or a quiet admission window
    let first = tokio::select! {
        _ = cancel.cancelled() => {
            link.close().await;
            return SessionEnd::Cancelled;
        }
        frame = timeout(ADMISSION_WINDOW, link.next()) => match frame {
            Ok(frame) => match read_frame(frame) {
                Ok(message) => Some(message),
                Err(end) => return end,
            },
            Err(_) => None,
        },
    };

    let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
    *inner.outbound.lock() = Some(tx.clone());
    inner.set_state(ConnectionState::Connected);
    if let Some(message) = first.filter(|m| !matches!(m, ServerMessage::Pong { .. })) {
        inner.dispatch(Notice::Message(message));
    }

    let ping_interval = inner.config.ping_interval();
    let mut next_ping = ping_interval.map(|every| Instant::now() + every);
    let mut pong_deadline: Option<Instant> = None;

    let end = loop {
        let timer = pong_deadline.or(next_ping);

        tokio::select! {
            _ = cancel.cancelled() => {
                link.close().await;
                break SessionEnd::Cancelled;
            }

            Some(message) = rx.recv() => {
                if let Err(e) = link.send(&message).await {
                    break SessionEnd::Lost(e.to_string());
                }
            }

            frame = link.next() => match read_frame(frame) {
                Ok(ServerMessage::Pong { .. }) => pong_deadline = None,
                Ok(message) => inner.dispatch(Notice::Message(message)),
                Err(end) => break end,
            },

            _ = sleep_until_some(timer) => {
                let Some(every) = ping_interval else { continue };
                if pong_deadline.is_some() {
                    break SessionEnd::Lost(ClientError::KeepaliveTimeout(every).to_string());
                }
                if let Err(e) = link.send(&ClientMessage::ping()).await {
                    break SessionEnd::Lost(e.to_string());
                }
                let now = Instant::now();
                pong_deadline = Some(now + every);
                next_ping = Some(now + every);
            }
        }
    };

    // Outbound messages are never carried over to the next link
    let mut outbound = inner.outbound.lock();
    if outbound.as_ref().is_some_and(|current| current.same_channel(&tx)) {
        *outbound = None;
    }
    drop(outbound);
    end
}

/// A hub message, or how the session ended.
fn read_frame(frame: LinkFrame) -> Result<ServerMessage, SessionEnd> {
    match frame {
        LinkFrame::Message(message) => Ok(message),
        LinkFrame::Closed { code: Some(CLOSE_TOO_MANY_CONNECTIONS), .. }
        | LinkFrame::Error(ClientError::Rejected) => Err(SessionEnd::Rejected),
        LinkFrame::Closed { code, reason } => {
            Err(SessionEnd::Lost(ClientError::Closed { code, reason }.to_string()))
        }
        LinkFrame::Error(e) => Err(SessionEnd::Lost(e.to_string())),
    }
}

/// Capped exponential backoff: base, 2x base, 4x base, ... up to the max.
pub fn backoff_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let base = config.reconnect_delay();
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(config.max_reconnect_delay())
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
