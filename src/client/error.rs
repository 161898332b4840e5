//! Error types for the client side of synchronization.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::files::FileApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The hub is at its connection ceiling. Never retried automatically.
    #[error("Connection rejected by hub: too many connections")]
    Rejected,

    #[error("Retry not allowed yet, wait another {}s", remaining.as_secs().max(1))]
    CooldownActive { remaining: Duration },

    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("No pong within {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid hub URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to fetch {path}: {source}")]
    FetchFailed {
        path: PathBuf,
        #[source]
        source: FileApiError,
    },

    #[error("Fetching {path} timed out after {after:?}")]
    Timeout { path: PathBuf, after: Duration },

    #[error("{path} was removed externally")]
    ExternalDelete { path: PathBuf },
}
