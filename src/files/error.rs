//! Error types for the collaborating file API.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileApiError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Path is a directory: {0}")]
    IsDirectory(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotDirectory(PathBuf),

    #[error("Path is empty")]
    EmptyPath,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file service answered with a non-success status.
    #[error("File service returned {status}: {detail}")]
    Service { status: u16, detail: String },

    #[error("File service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid file service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FileApiError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            FileApiError::NotFound(path)
        } else {
            FileApiError::Io { path, source }
        }
    }
}

pub type FileApiResult<T> = Result<T, FileApiError>;
