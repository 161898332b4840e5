//! Error types for the filesystem watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Neither native notifications nor polling could observe the root.
    #[error("Cannot watch {root}: {reason}")]
    Unavailable { root: PathBuf, reason: String },

    #[error("Watch root {root} does not exist or is not a directory")]
    RootMissing { root: PathBuf },
}

impl WatchError {
    pub(crate) fn unavailable(root: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        WatchError::Unavailable {
            root: root.into(),
            reason: err.to_string(),
        }
    }
}
