//! Raw notifications in, at most one change event per quiet window out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::{ChangeEvent, ChangeKind, OriginTag};
use crate::watcher::{Debouncer, FileFingerprint};

/// Debounce table plus the last state broadcast for each path.
///
/// Owned by a single watch task, so it needs no locking.
#[derive(Debug)]
pub struct ChangeNormalizer {
    debouncer: Debouncer,
    last_broadcast: HashMap<PathBuf, FileFingerprint>,
}

impl ChangeNormalizer {
    pub fn new(window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            last_broadcast: HashMap::new(),
        }
    }

    /// Note activity on `path`, restarting its quiet window.
    pub fn record(&mut self, path: PathBuf) {
        self.debouncer.record(path);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// Paths whose quiet window has elapsed, oldest first.
    ///
    /// Fingerprint them off the executor and hand the result to
    /// [`settle`](Self::settle).
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        self.debouncer.take_ready()
    }

    /// Emit events for every captured path whose on-disk state differs from
    /// what was last broadcast.
    ///
    /// `origin_for` is consulted for every path, changed or not, so a claim
    /// left by a save that changed nothing cannot tag a later external write.
    pub fn settle(
        &mut self,
        captured: Vec<(PathBuf, FileFingerprint)>,
        mut origin_for: impl FnMut(&Path) -> Option<OriginTag>,
    ) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        for (path, current) in captured {
            let origin = origin_for(&path);
            if self.last_broadcast.get(&path) == Some(&current) {
                crate::debug_event!("normalize", "unchanged", "{}", path.display());
                continue;
            }

            let kind = if current.exists() {
                self.last_broadcast.insert(path.clone(), current);
                ChangeKind::ContentChanged
            } else {
                // A missing entry already reads as changed on recreation
                self.last_broadcast.remove(&path);
                ChangeKind::Deleted
            };
            events.push(ChangeEvent::new(kind, path, origin));
        }

        events
    }
}
