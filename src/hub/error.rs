//! Error types for the change broadcast hub.

use std::path::PathBuf;
use thiserror::Error;

use super::ConnectionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The connection ceiling is reached; the client must not auto-retry.
    #[error("Too many connections ({current}/{max})")]
    Rejected { current: usize, max: usize },

    #[error("Invalid watch root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Path {path} is outside of connection root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

pub type HubResult<T> = Result<T, HubError>;
