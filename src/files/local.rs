//! Direct filesystem implementation of [`FileApi`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{BINARY_PLACEHOLDER, FileApi, FileApiError, FileApiResult, FileContent, FileTree, TreeEntry};

/// Listings stop descending below this depth.
pub const MAX_TREE_DEPTH: usize = 10;

const SNIFF_LEN: usize = 8192;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "js", "jsx", "ts", "tsx", "html", "htm", "css", "scss", "sass", "json", "xml",
    "yaml", "yml", "toml", "ini", "cfg", "conf", "log", "sql", "sh", "bash", "zsh", "php", "rb",
    "go", "rs", "java", "c", "cpp", "h", "hpp", "cs", "kt", "swift", "m", "mm", "vue", "svelte",
    "r", "dockerfile", "gitignore", "gitattributes", "env", "editorconfig", "prettierrc",
    "eslintrc", "babelrc", "npmrc", "yarnrc", "csv", "tsv",
];

#[derive(Debug, Clone)]
pub struct LocalFileApi {
    max_depth: usize,
}

impl Default for LocalFileApi {
    fn default() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
        }
    }
}

impl LocalFileApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve a user-supplied directory to its canonical form.
    pub fn resolve_root(&self, path: &Path) -> FileApiResult<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(FileApiError::EmptyPath);
        }
        let canonical = path.canonicalize().map_err(|e| FileApiError::io(path, e))?;
        if !canonical.is_dir() {
            return Err(FileApiError::NotDirectory(canonical));
        }
        Ok(canonical)
    }
}

#[async_trait]
impl FileApi for LocalFileApi {
    async fn list(&self, path: &Path) -> FileApiResult<FileTree> {
        let root = self.resolve_root(path)?;
        let max_depth = self.max_depth;

        let walk_root = root.clone();
        let tree = tokio::task::spawn_blocking(move || build_tree(&walk_root, 0, max_depth))
            .await
            .map_err(|e| FileApiError::Io {
                path: root.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;

        Ok(FileTree {
            root_path: root,
            tree,
        })
    }

    /// Reports the canonical path, which is what hub events carry.
    async fn read(&self, path: &Path) -> FileApiResult<FileContent> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| FileApiError::io(path, e))?;
        let path = canonical.as_path();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| FileApiError::io(path, e))?;
        if metadata.is_dir() {
            return Err(FileApiError::IsDirectory(path.to_path_buf()));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FileApiError::io(path, e))?;

        let text = if has_text_extension(path) || looks_like_text(&bytes[..bytes.len().min(SNIFF_LEN)]) {
            String::from_utf8(bytes).ok()
        } else {
            None
        };

        Ok(match text {
            Some(content) => FileContent {
                path: path.to_path_buf(),
                content,
                is_binary: false,
            },
            None => FileContent {
                path: path.to_path_buf(),
                content: BINARY_PLACEHOLDER.to_string(),
                is_binary: true,
            },
        })
    }

    async fn write(&self, path: &Path, content: &str) -> FileApiResult<()> {
        if path.as_os_str().is_empty() {
            return Err(FileApiError::EmptyPath);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileApiError::io(parent, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| FileApiError::io(path, e))?;

        crate::debug_event!("files", "wrote", "{} ({} bytes)", path.display(), content.len());
        Ok(())
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off at the sniff boundary is fine
        Err(e) => e.error_len().is_none(),
    }
}

fn build_tree(dir: &Path, depth: usize, max_depth: usize) -> Vec<TreeEntry> {
    if depth >= max_depth {
        return Vec::new();
    }

    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut entries: Vec<_> = read_dir
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (!name.starts_with('.')).then(|| (name, entry.path()))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .map(|(name, path)| {
            let is_directory = path.is_dir();
            let children = is_directory.then(|| build_tree(&path, depth + 1, max_depth));
            TreeEntry {
                name,
                path,
                is_directory,
                children,
            }
        })
        .collect()
}
