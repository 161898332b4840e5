//! The request/response file API the sync core collaborates with.
//!
//! The reconciliation engine only ever calls [`FileApi::read`] (hot-patch)
//! and [`FileApi::list`] (tree refresh). Writes come from the editing
//! surface, which then announces them through the connection manager.

mod error;
mod http;
mod local;

pub use error::{FileApiError, FileApiResult};
pub use http::HttpFileApi;
pub use local::{LocalFileApi, MAX_TREE_DEPTH};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::OriginTag;

/// One node of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeEntry>>,
}

impl TreeEntry {
    /// Total number of entries below and including this one.
    pub fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(TreeEntry::count)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTree {
    pub root_path: PathBuf,
    pub tree: Vec<TreeEntry>,
}

impl FileTree {
    pub fn entry_count(&self) -> usize {
        self.tree.iter().map(TreeEntry::count).sum()
    }
}

/// File content as served to viewers.
///
/// Binary files carry a placeholder instead of their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub path: PathBuf,
    pub content: String,
    pub is_binary: bool,
}

/// Body of `POST /api/file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub path: PathBuf,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tag: Option<OriginTag>,
}

/// Body of `POST /api/open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub path: PathBuf,
}

/// Error body returned by the file service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Placeholder content for binary files.
pub const BINARY_PLACEHOLDER: &str = "[Binary file]";

#[async_trait]
pub trait FileApi: Send + Sync {
    /// Recursive listing of a directory.
    async fn list(&self, path: &Path) -> FileApiResult<FileTree>;

    async fn read(&self, path: &Path) -> FileApiResult<FileContent>;

    /// Write `content`, creating parent directories as needed.
    async fn write(&self, path: &Path, content: &str) -> FileApiResult<()>;
}
