//! Origin claims: which tab caused the next change on a path.
//!
//! A tab that saves a file announces it; the watcher sees the write a little
//! later. The claim bridges the two so the debounced event carries the
//! saving tab's tag.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::OriginTag;

#[derive(Debug)]
pub struct OriginClaims {
    claims: HashMap<PathBuf, (OriginTag, Instant)>,
    ttl: Duration,
}

impl OriginClaims {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claims: HashMap::new(),
            ttl,
        }
    }

    /// Record that `tag` wrote `path`. A later claim replaces an earlier one.
    pub fn claim(&mut self, path: PathBuf, tag: OriginTag) {
        self.claims.insert(path, (tag, Instant::now()));
    }

    /// Take the live claim for `path`, if any. Expired claims are discarded.
    pub fn take(&mut self, path: &Path) -> Option<OriginTag> {
        let (tag, at) = self.claims.remove(path)?;
        (at.elapsed() <= self.ttl).then_some(tag)
    }

    /// Drop expired claims.
    pub fn prune(&mut self) {
        let ttl = self.ttl;
        self.claims.retain(|_, (_, at)| at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_claim_is_taken_once() {
        let mut claims = OriginClaims::new(Duration::from_secs(5));
        claims.claim(PathBuf::from("/r/a.txt"), OriginTag::new("t1"));

        assert_eq!(claims.take(Path::new("/r/a.txt")), Some(OriginTag::new("t1")));
        assert_eq!(claims.take(Path::new("/r/a.txt")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_claim_is_ignored() {
        let mut claims = OriginClaims::new(Duration::from_millis(500));
        claims.claim(PathBuf::from("/r/a.txt"), OriginTag::new("t1"));
        claims.claim(PathBuf::from("/r/b.txt"), OriginTag::new("t2"));

        advance(Duration::from_millis(600)).await;
        assert_eq!(claims.take(Path::new("/r/a.txt")), None);

        claims.prune();
        assert!(claims.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_claim_wins() {
        let mut claims = OriginClaims::new(Duration::from_secs(5));
        claims.claim(PathBuf::from("/r/a.txt"), OriginTag::new("t1"));
        claims.claim(PathBuf::from("/r/a.txt"), OriginTag::new("t2"));

        assert_eq!(claims.len(), 1);
        assert_eq!(claims.take(Path::new("/r/a.txt")), Some(OriginTag::new("t2")));
    }
}
