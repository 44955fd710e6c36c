//! A minimal set of pinned root CIDs. No GC walk is implemented here;
//! `PinSet` only records which roots an embedder has asked to keep, for
//! that embedder's own GC to consult.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cid::Cid;

/// A concurrency-safe set of pinned root CIDs.
#[derive(Clone, Default)]
pub struct PinSet {
    pins: Arc<RwLock<HashSet<Cid>>>,
}

impl std::fmt::Debug for PinSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinSet").finish_non_exhaustive()
    }
}

impl PinSet {
    /// An empty pin set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `cid` as pinned. Idempotent.
    pub async fn pin(&self, cid: Cid) {
        self.pins.write().await.insert(cid);
    }

    /// Unmark `cid`. A no-op if it wasn't pinned.
    pub async fn unpin(&self, cid: &Cid) {
        self.pins.write().await.remove(cid);
    }

    /// Whether `cid` is currently pinned.
    pub async fn is_pinned(&self, cid: &Cid) -> bool {
        self.pins.read().await.contains(cid)
    }

    /// Snapshot of every currently pinned CID.
    pub async fn pinned(&self) -> Vec<Cid> {
        self.pins.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Multihash;

    fn sample_cid(byte: u8) -> Cid {
        Cid::for_content("raw", Multihash::sha2_256(&[byte]))
    }

    #[tokio::test]
    async fn pin_then_unpin_round_trips() {
        let pins = PinSet::new();
        let cid = sample_cid(1);
        assert!(!pins.is_pinned(&cid).await);

        pins.pin(cid.clone()).await;
        assert!(pins.is_pinned(&cid).await);
        assert_eq!(pins.pinned().await, vec![cid.clone()]);

        pins.unpin(&cid).await;
        assert!(!pins.is_pinned(&cid).await);
        assert!(pins.pinned().await.is_empty());
    }

    #[tokio::test]
    async fn pin_is_idempotent() {
        let pins = PinSet::new();
        let cid = sample_cid(2);
        pins.pin(cid.clone()).await;
        pins.pin(cid.clone()).await;
        assert_eq!(pins.pinned().await.len(), 1);
    }

    #[tokio::test]
    async fn unpin_unknown_cid_is_a_no_op() {
        let pins = PinSet::new();
        pins.unpin(&sample_cid(3)).await;
        assert!(pins.pinned().await.is_empty());
    }
}
