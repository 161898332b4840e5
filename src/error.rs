//! Crate-level error taxonomy.
//!
//! Subsystems keep their own error enums; this is what crosses subsystem
//! boundaries and what user-facing surfaces are told about.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::client::{ClientError, ReconcileError};
use crate::hub::HubError;
use crate::watcher::WatchError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A root cannot be observed. Clients fall back to manual refresh.
    #[error("Changes under {root} are not being watched ({reason}); refresh manually")]
    WatchUnavailable { root: PathBuf, reason: String },

    /// The hub is over capacity. Never retried automatically.
    #[error("{}", rejected_message(*retry_after))]
    ConnectionRejected { retry_after: Option<Duration> },

    #[error("Connection lost: {reason}")]
    TransientDisconnect { reason: String },

    #[error("Could not refresh {path}: {reason}")]
    ReconcileFetchFailed { path: PathBuf, reason: String },

    /// Terminal for the affected document.
    #[error("{path} was removed externally")]
    ExternalDelete { path: PathBuf },
}

fn rejected_message(retry_after: Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(
            "Sync server is at capacity; retry in {}s",
            wait.as_secs().max(1)
        ),
        None => "Sync server is at capacity".to_string(),
    }
}

impl SyncError {
    /// Whether the system retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientDisconnect { .. } | SyncError::ReconcileFetchFailed { .. }
        )
    }

    /// Whether a user should be told, as opposed to silent recovery.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncError::WatchUnavailable { .. }
                | SyncError::ConnectionRejected { .. }
                | SyncError::ExternalDelete { .. }
        )
    }
}

impl From<WatchError> for SyncError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Unavailable { root, reason } => SyncError::WatchUnavailable { root, reason },
            WatchError::RootMissing { ref root } => SyncError::WatchUnavailable {
                root: root.clone(),
                reason: err.to_string(),
            },
        }
    }
}

impl From<HubError> for SyncError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Rejected { .. } => SyncError::ConnectionRejected { retry_after: None },
            HubError::InvalidRoot { path, reason } => SyncError::WatchUnavailable { root: path, reason },
            HubError::OutsideRoot { ref root, .. } => SyncError::WatchUnavailable {
                root: root.clone(),
                reason: err.to_string(),
            },
            HubError::UnknownConnection(_) => SyncError::TransientDisconnect {
                reason: err.to_string(),
            },
        }
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rejected => SyncError::ConnectionRejected { retry_after: None },
            ClientError::CooldownActive { remaining } => SyncError::ConnectionRejected {
                retry_after: Some(remaining),
            },
            other => SyncError::TransientDisconnect {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ReconcileError> for SyncError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::ExternalDelete { path } => SyncError::ExternalDelete { path },
            ReconcileError::FetchFailed { ref path, ref source } => SyncError::ReconcileFetchFailed {
                path: path.clone(),
                reason: source.to_string(),
            },
            ReconcileError::Timeout { ref path, .. } => SyncError::ReconcileFetchFailed {
                path: path.clone(),
                reason: err.to_string(),
            },
        }
    }
}
