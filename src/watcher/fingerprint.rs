//! On-disk state snapshots used to suppress no-op notifications.
//!
//! A `touch` or a chmod produces a modify notification without changing
//! anything a viewer cares about. Comparing fingerprints before and after
//! filters those out.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Observable state of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFingerprint {
    Absent,
    Directory,
    File { len: u64, digest: [u8; 32] },
}

impl FileFingerprint {
    /// Snapshot the current state of `path`.
    ///
    /// Unreadable files (permissions, a writer holding an exclusive lock)
    /// fingerprint by length only, so they still register as changed.
    pub fn capture(path: &Path) -> Self {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return FileFingerprint::Absent,
        };

        if metadata.is_dir() {
            return FileFingerprint::Directory;
        }

        let digest = hash_file(path).unwrap_or_else(|e| {
            crate::debug_event!("fingerprint", "unreadable", "{}: {e}", path.display());
            [0u8; 32]
        });

        FileFingerprint::File {
            len: metadata.len(),
            digest,
        }
    }

    /// Snapshot every path in `paths`. Reads whole files, so run it on a
    /// blocking thread.
    pub fn capture_all(paths: Vec<PathBuf>) -> Vec<(PathBuf, FileFingerprint)> {
        paths
            .into_iter()
            .map(|path| {
                let fingerprint = FileFingerprint::capture(&path);
                (path, fingerprint)
            })
            .collect()
    }

    pub fn exists(&self) -> bool {
        !matches!(self, FileFingerprint::Absent)
    }
}

fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
