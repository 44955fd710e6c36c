//! Concurrency-safe CID → waiters map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::block::DataBlock;
use crate::cid::Cid;
use crate::external::PeerId;

/// A single pending request for a block, resolved by `Found` or
/// cancelled individually (dropping the sender) or in bulk by `Unwant`.
type Waiter = oneshot::Sender<DataBlock>;

/// Identifies one waiter within a [`WantedBlock`], returned by `want` so
/// a caller can later cancel just that waiter without disturbing
/// others on the same CID.
pub type WaiterId = u64;

/// A CID currently being sought, owned by the [`WantRegistry`].
struct WantedBlock {
    next_waiter_id: WaiterId,
    waiters: HashMap<WaiterId, Waiter>,
    interested_peers: Vec<PeerId>,
}

/// A concurrency-safe want registry.
///
/// Each entry's state transition (`Want → Found | Unwant`) is totally
/// ordered by holding the registry's mutex for the whole operation, so
/// waiters on a resolved entry all observe the same outcome. Once
/// `Found` or `Unwant` runs for a CID, the entry is gone; a later
/// `Want` for the same CID creates a fresh one.
///
/// Per-waiter cancellation (`cancel_waiter`) is deliberately narrower
/// than `Unwant`: it drops only the one waiter that asked to be
/// cancelled — a single cancelled caller shouldn't revoke every other
/// caller's outstanding want for the same CID.
#[derive(Clone, Default)]
pub struct WantRegistry {
    entries: Arc<Mutex<HashMap<Cid, WantedBlock>>>,
}

impl WantRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `cid` from `peer`, returning the new
    /// waiter's id and a receiver that resolves once the block is
    /// found (or is dropped, silently, if the waiter is cancelled or
    /// the entry is cleared by `Unwant`).
    ///
    /// Returns `(waiter_id, receiver, newly_created)`: `newly_created`
    /// tells the caller whether this is the first waiter for `cid`,
    /// used to decide whether a want-list broadcast is needed.
    pub async fn want(
        &self,
        cid: Cid,
        peer: PeerId,
    ) -> (WaiterId, oneshot::Receiver<DataBlock>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        let newly_created = !entries.contains_key(&cid);
        let entry = entries.entry(cid).or_insert_with(|| WantedBlock {
            next_waiter_id: 0,
            waiters: HashMap::new(),
            interested_peers: Vec::new(),
        });
        let waiter_id = entry.next_waiter_id;
        entry.next_waiter_id += 1;
        entry.waiters.insert(waiter_id, tx);
        if !entry.interested_peers.contains(&peer) {
            entry.interested_peers.push(peer);
        }
        (waiter_id, rx, newly_created)
    }

    /// Remove the entry for `cid`, dropping (and so cancelling) every
    /// waiter.
    pub async fn unwant(&self, cid: &Cid) {
        let mut entries = self.entries.lock().await;
        entries.remove(cid);
    }

    /// Cancel a single waiter, leaving any other waiter on the same
    /// CID untouched. If this was the last waiter for `cid`, the entry
    /// is dropped entirely (there is nothing left to notify and no
    /// reason to keep tracking the CID as wanted).
    pub async fn cancel_waiter(&self, cid: &Cid, waiter_id: WaiterId) {
        let mut entries = self.entries.lock().await;
        let std::collections::hash_map::Entry::Occupied(mut occupied) = entries.entry(cid.clone())
        else {
            return;
        };
        let entry = occupied.get_mut();
        entry.waiters.remove(&waiter_id);
        if entry.waiters.is_empty() {
            occupied.remove();
        }
    }

    /// Remove the entry for `cid`, resolving every waiter with `block`.
    /// Returns the number of waiters notified.
    pub async fn found(&self, cid: &Cid, block: &DataBlock) -> usize {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.remove(cid) else {
            return 0;
        };
        let mut notified = 0;
        for (_, waiter) in entry.waiters {
            if waiter.send(block.clone()).is_ok() {
                notified += 1;
            }
        }
        notified
    }

    /// Snapshot of CIDs whose `interested_peers` contains `peer`.
    pub async fn peer_wants(&self, peer: &PeerId) -> Vec<Cid> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(_, entry)| entry.interested_peers.contains(peer))
            .map(|(cid, _)| cid.clone())
            .collect()
    }

    /// Snapshot of every CID currently wanted, for a full want-list
    /// broadcast.
    pub async fn all_wants(&self) -> Vec<Cid> {
        let entries = self.entries.lock().await;
        entries.keys().cloned().collect()
    }

    /// Whether the registry currently has any outstanding entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Cancel every outstanding waiter across all entries, clearing the
    /// registry. Used on Bitswap Engine `Stop`.
    pub async fn cancel_all(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_block() -> DataBlock {
        DataBlock::new_raw(Bytes::from_static(b"registry test block"))
    }

    #[tokio::test]
    async fn want_is_newly_created_once_per_cid() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (_id1, _rx1, first) = registry.want(block.id.clone(), PeerId("a".into())).await;
        assert!(first);
        let (_id2, _rx2, second) = registry.want(block.id.clone(), PeerId("b".into())).await;
        assert!(!second);
    }

    #[tokio::test]
    async fn found_resolves_all_waiters() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (_id1, rx1, _) = registry.want(block.id.clone(), PeerId("a".into())).await;
        let (_id2, rx2, _) = registry.want(block.id.clone(), PeerId("b".into())).await;

        let notified = registry.found(&block.id, &block).await;
        assert_eq!(notified, 2);
        assert_eq!(rx1.await.unwrap(), block);
        assert_eq!(rx2.await.unwrap(), block);
    }

    #[tokio::test]
    async fn unwant_cancels_waiters_without_resolving() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (_id, rx, _) = registry.want(block.id.clone(), PeerId("a".into())).await;
        registry.unwant(&block.id).await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn cancel_waiter_only_affects_that_waiter() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (id1, rx1, _) = registry.want(block.id.clone(), PeerId("a".into())).await;
        let (_id2, rx2, _) = registry.want(block.id.clone(), PeerId("b".into())).await;

        registry.cancel_waiter(&block.id, id1).await;
        assert!(rx1.await.is_err());

        let notified = registry.found(&block.id, &block).await;
        assert_eq!(notified, 1);
        assert_eq!(rx2.await.unwrap(), block);
    }

    #[tokio::test]
    async fn cancel_waiter_drops_entry_once_empty() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (id, _rx, _) = registry.want(block.id.clone(), PeerId("a".into())).await;
        registry.cancel_waiter(&block.id, id).await;
        assert!(registry.is_empty().await);

        let (_id2, _rx2, newly_created) = registry.want(block.id.clone(), PeerId("a".into())).await;
        assert!(newly_created);
    }

    #[tokio::test]
    async fn want_after_found_creates_fresh_entry() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (_id, _rx, first) = registry.want(block.id.clone(), PeerId("a".into())).await;
        assert!(first);
        registry.found(&block.id, &block).await;

        let (_id2, _rx2, newly_created) = registry.want(block.id.clone(), PeerId("a".into())).await;
        assert!(newly_created);
    }

    #[tokio::test]
    async fn peer_wants_reflects_interested_peers() {
        let registry = WantRegistry::new();
        let block = sample_block();
        registry.want(block.id.clone(), PeerId("a".into())).await;
        let wants = registry.peer_wants(&PeerId("a".into())).await;
        assert_eq!(wants, vec![block.id.clone()]);
        let none = registry.peer_wants(&PeerId("b".into())).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_clears_every_entry() {
        let registry = WantRegistry::new();
        let block = sample_block();
        let (_id, rx, _) = registry.want(block.id.clone(), PeerId("a".into())).await;
        registry.cancel_all().await;
        assert!(registry.is_empty().await);
        assert!(rx.await.is_err());
    }
}
