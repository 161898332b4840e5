//! Per-path debounce timers.
//!
//! Editors that save via truncate+write (or write+rename) produce several
//! raw notifications per logical save. Each path gets one deadline that is
//! pushed back on every notification; the path is released once the
//! deadline passes without further activity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// Debounces file change events by path.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending changes: path -> deadline after which it is ready.
    pending: HashMap<PathBuf, Instant>,
    /// Quiet interval required after the last notification.
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Create a debouncer with the given window in milliseconds.
    pub fn from_millis(window_ms: u64) -> Self {
        Self::new(Duration::from_millis(window_ms))
    }

    /// Record a raw notification, (re)starting the timer for this path.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now() + self.window);
    }

    /// Earliest deadline among pending paths.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Take all paths whose quiet window has elapsed, oldest deadline first.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut ready = Vec::new();

        self.pending.retain(|path, deadline| {
            if *deadline <= now {
                ready.push((*deadline, path.clone()));
                false
            } else {
                true
            }
        });

        ready.sort();
        ready.into_iter().map(|(_, path)| path).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_basic() {
        let mut debouncer = Debouncer::from_millis(50);

        let path = PathBuf::from("/test/file.txt");
        debouncer.record(path.clone());

        // Immediately after, nothing should be ready
        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        advance(Duration::from_millis(60)).await;

        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![path]);
        assert!(!debouncer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_resets_on_new_change() {
        let mut debouncer = Debouncer::from_millis(50);

        let path = PathBuf::from("/test/file.txt");
        debouncer.record(path.clone());
        advance(Duration::from_millis(30)).await;

        // Second notification pushes the deadline back
        debouncer.record(path.clone());
        advance(Duration::from_millis(30)).await;
        assert!(debouncer.take_ready().is_empty());

        advance(Duration::from_millis(25)).await;
        assert_eq!(debouncer.take_ready().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_in_one_window_releases_once() {
        let mut debouncer = Debouncer::from_millis(400);
        let path = PathBuf::from("/root/a.txt");

        // Three notifications within 200ms
        for _ in 0..3 {
            debouncer.record(path.clone());
            advance(Duration::from_millis(100)).await;
        }
        assert!(debouncer.take_ready().is_empty());

        advance(Duration::from_millis(400)).await;
        assert_eq!(debouncer.take_ready(), vec![path]);

        advance(Duration::from_millis(1000)).await;
        assert!(debouncer.take_ready().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_multiple_files() {
        let mut debouncer = Debouncer::from_millis(50);

        let path1 = PathBuf::from("/test/file1.txt");
        let path2 = PathBuf::from("/test/file2.txt");

        debouncer.record(path1.clone());
        advance(Duration::from_millis(30)).await;
        debouncer.record(path2.clone());
        assert_eq!(
            debouncer.next_deadline(),
            Some(Instant::now() + Duration::from_millis(20))
        );

        advance(Duration::from_millis(25)).await;
        assert_eq!(debouncer.take_ready(), vec![path1]);
        assert_eq!(debouncer.pending_count(), 1);

        advance(Duration::from_millis(30)).await;
        assert_eq!(debouncer.take_ready(), vec![path2]);
        assert_eq!(debouncer.next_deadline(), None);
    }
}
