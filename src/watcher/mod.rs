//! Filesystem side of synchronization.
//!
//! ```text
//! FsWatcher (notify thread, native or polling)
//!     | RawEvent { kind, path, mtime }
//!     v
//! Debouncer (per-path deadlines)  -->  FileFingerprint comparison (hub)
//! ```

mod debouncer;
mod error;
mod fingerprint;
mod fs_watcher;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use fingerprint::FileFingerprint;
pub use fs_watcher::{FsWatcher, RawEvent, RawKind, resolves_within};
