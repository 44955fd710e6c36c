//! Per-peer ledgers and aggregate exchange statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cid::Cid;
use crate::external::PeerId;

/// Per-peer exchange accounting. One instance exists per peer ever
/// interacted with; counters are monotonic for the engine's lifetime.
#[derive(Debug, Default)]
pub struct BitswapLedger {
    blocks_exchanged: AtomicU64,
    data_sent: AtomicU64,
    data_received: AtomicU64,
}

impl BitswapLedger {
    fn record_sent(&self, bytes: u64) {
        self.blocks_exchanged.fetch_add(1, Ordering::Relaxed);
        self.data_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_received(&self, bytes: u64) {
        self.blocks_exchanged.fetch_add(1, Ordering::Relaxed);
        self.data_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A point-in-time snapshot of this ledger's counters.
    pub fn snapshot(&self, peer: PeerId) -> LedgerSnapshot {
        LedgerSnapshot {
            peer,
            blocks_exchanged: self.blocks_exchanged.load(Ordering::Relaxed),
            data_sent: self.data_sent.load(Ordering::Relaxed),
            data_received: self.data_received.load(Ordering::Relaxed),
        }
    }
}

/// An immutable snapshot of a [`BitswapLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// The peer this ledger tracks.
    pub peer: PeerId,
    /// Total blocks sent plus received.
    pub blocks_exchanged: u64,
    /// Total bytes sent.
    pub data_sent: u64,
    /// Total bytes received.
    pub data_received: u64,
}

/// Aggregate exchange counters across all peers.
#[derive(Debug, Default)]
pub struct AggregateStats {
    blocks_received: AtomicU64,
    blocks_sent: AtomicU64,
    data_received: AtomicU64,
    data_sent: AtomicU64,
    dup_blocks_received: AtomicU64,
    dup_data_received: AtomicU64,
}

/// A point-in-time snapshot of [`AggregateStats`] plus the current
/// want-list and peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitswapStats {
    /// Total blocks received from any peer.
    pub blocks_received: u64,
    /// Total blocks sent to any peer.
    pub blocks_sent: u64,
    /// Total bytes received.
    pub data_received: u64,
    /// Total bytes sent.
    pub data_sent: u64,
    /// Blocks received that were already in the store.
    pub dup_blocks_received: u64,
    /// Bytes received as part of a duplicate block.
    pub dup_data_received: u64,
    /// CIDs currently outstanding in the want registry.
    pub wantlist: Vec<Cid>,
    /// Peers with a ledger.
    pub peers: Vec<PeerId>,
}

/// Owns every peer's [`BitswapLedger`] plus the aggregate counters,
/// composed by the Bitswap Engine.
#[derive(Debug, Default)]
pub struct LedgerBook {
    ledgers: RwLock<HashMap<PeerId, Arc<BitswapLedger>>>,
    stats: AggregateStats,
}

impl LedgerBook {
    /// An empty ledger book.
    pub fn new() -> Self {
        Self::default()
    }

    async fn ledger_for(&self, peer: &PeerId) -> Arc<BitswapLedger> {
        if let Some(ledger) = self.ledgers.read().await.get(peer) {
            return ledger.clone();
        }
        let mut ledgers = self.ledgers.write().await;
        ledgers
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(BitswapLedger::default()))
            .clone()
    }

    /// Record a block of `bytes` sent to `peer`.
    pub async fn record_block_sent(&self, peer: &PeerId, bytes: u64) {
        self.ledger_for(peer).await.record_sent(bytes);
        self.stats.blocks_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.data_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a block of `bytes` received from `peer`. `duplicate`
    /// marks whether the CID was already present in the store.
    pub async fn record_block_received(&self, peer: &PeerId, bytes: u64, duplicate: bool) {
        self.ledger_for(peer).await.record_received(bytes);
        self.stats.blocks_received.fetch_add(1, Ordering::Relaxed);
        self.stats.data_received.fetch_add(bytes, Ordering::Relaxed);
        if duplicate {
            self.stats.dup_blocks_received.fetch_add(1, Ordering::Relaxed);
            self.stats.dup_data_received.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// The ledger snapshot for `peer`, synthesizing a fresh all-zero
    /// ledger if none has interacted with this peer yet.
    pub async fn ledger_for_peer(&self, peer: &PeerId) -> LedgerSnapshot {
        self.ledger_for(peer).await.snapshot(peer.clone())
    }

    /// Build a full [`BitswapStats`] snapshot, given the current
    /// want-list (from the [`super::want_registry::WantRegistry`]).
    pub async fn statistics(&self, wantlist: Vec<Cid>) -> BitswapStats {
        let peers = self.ledgers.read().await.keys().cloned().collect();
        BitswapStats {
            blocks_received: self.stats.blocks_received.load(Ordering::Relaxed),
            blocks_sent: self.stats.blocks_sent.load(Ordering::Relaxed),
            data_received: self.stats.data_received.load(Ordering::Relaxed),
            data_sent: self.stats.data_sent.load(Ordering::Relaxed),
            dup_blocks_received: self.stats.dup_blocks_received.load(Ordering::Relaxed),
            dup_data_received: self.stats.dup_data_received.load(Ordering::Relaxed),
            wantlist,
            peers,
        }
    }

    /// Clear every peer ledger and reset aggregate counters. Used on
    /// Bitswap Engine `Start`.
    pub async fn reset(&self) {
        self.ledgers.write().await.clear();
        self.stats.blocks_received.store(0, Ordering::Relaxed);
        self.stats.blocks_sent.store(0, Ordering::Relaxed);
        self.stats.data_received.store(0, Ordering::Relaxed);
        self.stats.data_sent.store(0, Ordering::Relaxed);
        self.stats.dup_blocks_received.store(0, Ordering::Relaxed);
        self.stats.dup_data_received.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_and_received_independently() {
        let book = LedgerBook::new();
        let peer = PeerId("a".into());
        book.record_block_sent(&peer, 10).await;
        book.record_block_received(&peer, 20, false).await;

        let ledger = book.ledger_for_peer(&peer).await;
        assert_eq!(ledger.blocks_exchanged, 2);
        assert_eq!(ledger.data_sent, 10);
        assert_eq!(ledger.data_received, 20);
    }

    #[tokio::test]
    async fn duplicate_received_blocks_increment_dup_counters() {
        let book = LedgerBook::new();
        let peer = PeerId("a".into());
        book.record_block_received(&peer, 5, false).await;
        book.record_block_received(&peer, 5, true).await;

        let stats = book.statistics(Vec::new()).await;
        assert_eq!(stats.blocks_received, 2);
        assert_eq!(stats.dup_blocks_received, 1);
        assert_eq!(stats.dup_data_received, 5);
    }

    #[tokio::test]
    async fn statistics_lists_known_peers() {
        let book = LedgerBook::new();
        book.record_block_sent(&PeerId("a".into()), 1).await;
        book.record_block_sent(&PeerId("b".into()), 1).await;
        let stats = book.statistics(Vec::new()).await;
        assert_eq!(stats.peers.len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_ledgers_and_counters() {
        let book = LedgerBook::new();
        let peer = PeerId("a".into());
        book.record_block_sent(&peer, 99).await;
        book.reset().await;
        let stats = book.statistics(Vec::new()).await;
        assert_eq!(stats.blocks_sent, 0);
        assert!(stats.peers.is_empty());
    }
}
