//! Wire protocol between the hub and its clients.
//!
//! Messages are small JSON records tagged by `type`:
//!
//! ```json
//! {"type":"content-changed","path":"/root/a.txt","originTag":"t-1a2b","timestamp":1700000000000}
//! {"type":"watch-unavailable","path":"/root","reason":"inotify limit","timestamp":1700000000000}
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// WebSocket close code sent when the hub is at its connection ceiling.
///
/// Clients must not auto-retry after seeing it.
pub const CLOSE_TOO_MANY_CONNECTIONS: u16 = 4429;

/// Reason text accompanying [`CLOSE_TOO_MANY_CONNECTIONS`].
pub const CLOSE_TOO_MANY_CONNECTIONS_REASON: &str = "too many connections";

/// Current time in millis since Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identifies the tab or session that caused a change.
///
/// Compared by equality only; the contents carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginTag(String);

impl OriginTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// A tag unique within this process and unlikely to collide across processes.
    pub fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        Self(format!(
            "t-{:x}-{:x}{:08x}-{seq}",
            std::process::id(),
            now_ms(),
            nanos
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    ContentChanged,
    Deleted,
    TabSyncRequest,
}

/// Normalized change notification delivered to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub origin: Option<OriginTag>,
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>, origin: Option<OriginTag>) -> Self {
        Self {
            kind,
            path: path.into(),
            origin,
            timestamp: now_ms(),
        }
    }
}

/// Messages the hub sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    ContentChanged {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_tag: Option<OriginTag>,
        timestamp: u64,
    },
    Deleted {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_tag: Option<OriginTag>,
        timestamp: u64,
    },
    TabSyncRequest {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_tag: Option<OriginTag>,
        timestamp: u64,
    },
    /// The watched root cannot be observed; clients fall back to manual refresh.
    WatchUnavailable {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
}

impl ServerMessage {
    /// The change event carried by this message, if any.
    pub fn change_event(&self) -> Option<ChangeEvent> {
        let (kind, path, origin_tag, timestamp) = match self {
            ServerMessage::ContentChanged {
                path,
                origin_tag,
                timestamp,
            } => (ChangeKind::ContentChanged, path, origin_tag, timestamp),
            ServerMessage::Deleted {
                path,
                origin_tag,
                timestamp,
            } => (ChangeKind::Deleted, path, origin_tag, timestamp),
            ServerMessage::TabSyncRequest {
                path,
                origin_tag,
                timestamp,
            } => (ChangeKind::TabSyncRequest, path, origin_tag, timestamp),
            ServerMessage::WatchUnavailable { .. } | ServerMessage::Pong { .. } => return None,
        };
        Some(ChangeEvent {
            kind,
            path: path.clone(),
            origin: origin_tag.clone(),
            timestamp: *timestamp,
        })
    }

    pub fn watch_unavailable(root: &Path, reason: Option<String>) -> Self {
        ServerMessage::WatchUnavailable {
            path: root.to_path_buf(),
            reason,
            timestamp: now_ms(),
        }
    }

    /// Path this message concerns, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ServerMessage::ContentChanged { path, .. }
            | ServerMessage::Deleted { path, .. }
            | ServerMessage::TabSyncRequest { path, .. }
            | ServerMessage::WatchUnavailable { path, .. } => Some(path),
            ServerMessage::Pong { .. } => None,
        }
    }
}

impl From<ChangeEvent> for ServerMessage {
    fn from(event: ChangeEvent) -> Self {
        let ChangeEvent {
            kind,
            path,
            origin,
            timestamp,
        } = event;
        match kind {
            ChangeKind::ContentChanged => ServerMessage::ContentChanged {
                path,
                origin_tag: origin,
                timestamp,
            },
            ChangeKind::Deleted => ServerMessage::Deleted {
                path,
                origin_tag: origin,
                timestamp,
            },
            ChangeKind::TabSyncRequest => ServerMessage::TabSyncRequest {
                path,
                origin_tag: origin,
                timestamp,
            },
        }
    }
}

/// Messages clients send to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// "I just saved `path`; tag the resulting event with me."
    ContentChanged {
        path: PathBuf,
        origin_tag: OriginTag,
        timestamp: u64,
    },
    /// Ask other tabs showing `path` to reload it now.
    TabSyncRequest {
        path: PathBuf,
        origin_tag: OriginTag,
        timestamp: u64,
    },
    ContentChangedAck {
        path: PathBuf,
        origin_tag: OriginTag,
        timestamp: u64,
    },
    Ping {
        timestamp: u64,
    },
}

impl ClientMessage {
    pub fn content_changed(path: impl Into<PathBuf>, origin_tag: OriginTag) -> Self {
        ClientMessage::ContentChanged {
            path: path.into(),
            origin_tag,
            timestamp: now_ms(),
        }
    }

    pub fn tab_sync_request(path: impl Into<PathBuf>, origin_tag: OriginTag) -> Self {
        ClientMessage::TabSyncRequest {
            path: path.into(),
            origin_tag,
            timestamp: now_ms(),
        }
    }

    pub fn ping() -> Self {
        ClientMessage::Ping {
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::ContentChanged {
            path: PathBuf::from("/root/a.txt"),
            origin_tag: Some(OriginTag::new("t1")),
            timestamp: 42,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "content-changed", "path": "/root/a.txt", "originTag": "t1", "timestamp": 42})
        );
    }

    #[test]
    fn test_missing_origin_tag_is_omitted_and_accepted() {
        let msg = ServerMessage::Deleted {
            path: PathBuf::from("/root/b.txt"),
            origin_tag: None,
            timestamp: 7,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("originTag"));

        let parsed: ServerMessage =
            serde_json::from_str(r#"{"type":"deleted","path":"/root/b.txt","timestamp":7}"#)
                .unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_client_message_parses_from_browser_json() {
        let parsed: ClientMessage = serde_json::from_str(
            r#"{"type":"content-changed-ack","path":"/r/x","originTag":"tab-9","timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ClientMessage::ContentChangedAck {
                path: PathBuf::from("/r/x"),
                origin_tag: OriginTag::new("tab-9"),
                timestamp: 1,
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"file_update","path":"/x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_change_event_conversion_keeps_fields() {
        let event = ChangeEvent {
            kind: ChangeKind::TabSyncRequest,
            path: PathBuf::from("/root/a.txt"),
            origin: Some(OriginTag::new("t2")),
            timestamp: 99,
        };
        let msg = ServerMessage::from(event.clone());
        assert_eq!(msg.change_event(), Some(event));
        assert_eq!(msg.path(), Some(Path::new("/root/a.txt")));
    }

    #[test]
    fn test_watch_unavailable_and_pong_carry_no_change() {
        let msg = ServerMessage::watch_unavailable(Path::new("/root"), Some("denied".into()));
        assert!(msg.change_event().is_none());
        assert!(ServerMessage::Pong { timestamp: 0 }.change_event().is_none());
    }

    #[test]
    fn test_generated_tags_are_distinct() {
        let a = OriginTag::generate();
        let b = OriginTag::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("t-"));
    }
}
