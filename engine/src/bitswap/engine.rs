//! The Bitswap Engine: composes the want registry, peer ledgers and
//! stats counters into the exchange protocol's core logic.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bitswap::ledger::{BitswapStats, LedgerBook, LedgerSnapshot};
use crate::bitswap::want_registry::WantRegistry;
use crate::block::DataBlock;
use crate::cid::Cid;
use crate::error::{Error, Result};
use crate::external::{PeerId, Swarm};
use crate::store::Store;

/// Tunables for the Bitswap Engine.
#[derive(Debug, Clone)]
pub struct BitswapConfig {
    /// Capacity of the internal `BlockNeeded` broadcast channel.
    pub block_needed_channel_capacity: usize,
}

impl Default for BitswapConfig {
    fn default() -> Self {
        Self {
            block_needed_channel_capacity: 256,
        }
    }
}

/// Whether the engine is currently started, and if so, its lifecycle
/// generation (used to invalidate stale `Stop` races).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
}

/// Protocol identifiers the engine registers with the swarm on Start.
pub const PROTOCOL_V1_0: &str = "/ipfs/bitswap/1.0.0";
pub const PROTOCOL_V1_1: &str = "/ipfs/bitswap/1.1.0";

/// Composes the want registry, per-peer ledgers, and aggregate stats
/// into the Bitswap exchange protocol.
pub struct BitswapEngine {
    store: Store,
    registry: WantRegistry,
    ledgers: LedgerBook,
    swarm: Option<Arc<dyn Swarm>>,
    block_needed: broadcast::Sender<Cid>,
    run_state: RwLock<RunState>,
}

impl std::fmt::Debug for BitswapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitswapEngine")
            .field("store", &self.store)
            .field("has_swarm", &self.swarm.is_some())
            .finish_non_exhaustive()
    }
}

impl BitswapEngine {
    /// Build an engine over `store`, with no swarm (broadcast and
    /// connection-established triggers become no-ops).
    pub fn new(store: Store, config: &BitswapConfig) -> Self {
        let (block_needed, _rx) = broadcast::channel(config.block_needed_channel_capacity);
        Self {
            store,
            registry: WantRegistry::new(),
            ledgers: LedgerBook::new(),
            swarm: None,
            block_needed,
            run_state: RwLock::new(RunState::Stopped),
        }
    }

    /// Build an engine wired to a real [`Swarm`].
    pub fn with_swarm(store: Store, config: &BitswapConfig, swarm: Arc<dyn Swarm>) -> Self {
        let mut engine = Self::new(store, config);
        engine.swarm = Some(swarm);
        engine
    }

    /// Subscribe to `BlockNeeded(cid)` notifications, emitted whenever
    /// a `WantAsync` call creates a brand-new want-registry entry. The
    /// block service uses this to kick off router lookups.
    pub fn block_needed_events(&self) -> broadcast::Receiver<Cid> {
        self.block_needed.subscribe()
    }

    /// Register both wire protocols, clear peer ledgers, and mark the
    /// engine running. A second `Start` while already running returns
    /// an error; `Stop` must run first.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.run_state.write().await;
        if *state == RunState::Running {
            return Err(Error::ProtocolError("engine already started".into()));
        }

        if let Some(swarm) = &self.swarm {
            swarm.add_protocol(crate::external::ProtocolId(PROTOCOL_V1_1));
            swarm.add_protocol(crate::external::ProtocolId(PROTOCOL_V1_0));
        }
        self.ledgers.reset().await;
        *state = RunState::Running;
        Ok(())
    }

    /// Unregister protocols, cancel every outstanding waiter, and mark
    /// the engine stopped. Always safe to call, including when already
    /// stopped.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        let mut state = self.run_state.write().await;
        if let Some(swarm) = &self.swarm {
            swarm.remove_protocol(crate::external::ProtocolId(PROTOCOL_V1_1));
            swarm.remove_protocol(crate::external::ProtocolId(PROTOCOL_V1_0));
        }
        self.registry.cancel_all().await;
        *state = RunState::Stopped;
    }

    /// Register a waiter for `cid` on behalf of `requester_peer`; if
    /// this is the first waiter for that CID, broadcast the want-list
    /// to every connected peer and emit a `BlockNeeded` event. Resolves
    /// once the block is `Found`, or with `Cancelled` if `cancel`
    /// fires first.
    ///
    /// Cancelling `cancel` removes only this caller's waiter: any other
    /// waiter on the same `cid` keeps waiting undisturbed. Use
    /// [`BitswapEngine::unwant`] to drop every waiter for a CID at once.
    #[tracing::instrument(skip(self, cancel), fields(cid = %cid))]
    pub async fn want_async(
        &self,
        cid: Cid,
        requester_peer: PeerId,
        cancel: CancellationToken,
    ) -> Result<DataBlock> {
        let (waiter_id, rx, newly_created) = self.registry.want(cid.clone(), requester_peer).await;

        if newly_created {
            let _ = self.block_needed.send(cid.clone());
            let wants = self.registry.all_wants().await;
            self.broadcast_want_list(wants, true).await;
        }

        tokio::select! {
            result = rx => result.map_err(|_| Error::Cancelled),
            _ = cancel.cancelled() => {
                self.registry.cancel_waiter(&cid, waiter_id).await;
                Err(Error::Cancelled)
            }
        }
    }

    /// Cancel every waiter for `cid` and remove its entry.
    pub async fn unwant(&self, cid: &Cid) {
        self.registry.unwant(cid).await;
    }

    /// Forward to the want registry; called by the Store (or any other
    /// code path that obtains a block some other way).
    pub async fn found(&self, cid: &Cid, block: &DataBlock) -> usize {
        self.registry.found(cid, block).await
    }

    /// Process a block received from `peer`. Classifies duplicates by
    /// checking the store before `Put`ting, updates ledgers and
    /// aggregate counters, and persists the block if it is new.
    ///
    /// `Store.Put` resolving the matching want-registry entry (via
    /// `Found`) is the caller's responsibility, not this engine's: this
    /// engine never calls `Found` itself.
    #[tracing::instrument(skip(self, block), fields(peer = %peer, cid = %block.id))]
    pub async fn on_block_received(&self, peer: &PeerId, block: &DataBlock) -> Result<()> {
        let duplicate = self.store.exists(&block.id).await?;
        self.ledgers
            .record_block_received(peer, block.size, duplicate)
            .await;

        if duplicate {
            tracing::debug!("dropping duplicate block");
            return Ok(());
        }

        self.store.put(block).await?;
        Ok(())
    }

    /// Record that `block` was sent to `peer`.
    pub async fn on_block_sent(&self, peer: &PeerId, block: &DataBlock) {
        self.ledgers.record_block_sent(peer, block.size).await;
    }

    /// The ledger snapshot for a given peer.
    pub async fn ledger_for(&self, peer: &PeerId) -> LedgerSnapshot {
        self.ledgers.ledger_for_peer(peer).await
    }

    /// The aggregate statistics snapshot.
    pub async fn statistics(&self) -> BitswapStats {
        let wantlist = self.registry.all_wants().await;
        self.ledgers.statistics(wantlist).await
    }

    /// React to a newly established, identity-verified connection: if
    /// the want registry is non-empty, send it the full want-list.
    /// Best-effort; failures are logged and swallowed.
    #[tracing::instrument(skip(self, connection))]
    pub async fn on_connection_established(&self, connection: &dyn crate::external::PeerConnection) {
        connection.identity_established().await;

        if self.registry.is_empty().await {
            return;
        }
        let wants = self.registry.all_wants().await;
        let peer = connection.remote_peer();
        if let Err(err) = self.send_want_list_to_peer(&peer, wants, true).await {
            tracing::warn!(%peer, error = %err, "failed to send want-list on connection established");
        }
    }

    /// Dial every known peer in parallel and send `wants`. Failures on
    /// one peer never abort the broadcast.
    async fn broadcast_want_list(&self, wants: Vec<Cid>, full: bool) {
        let Some(swarm) = &self.swarm else {
            return;
        };
        let peers = swarm.known_peers();
        let sends = peers.into_iter().map(|peer| {
            let wants = wants.clone();
            async move {
                if let Err(err) = self.send_want_list_to_peer(&peer, wants, full).await {
                    tracing::warn!(%peer, error = %err, "want-list send failed");
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Send `wants` to `peer`, preferring v1.1 over v1.0. The
    /// first protocol that dials successfully wins; this stub records
    /// the attempt through the swarm without framing an actual wire
    /// message, since that framing lives in `crate::bitswap::protocol`
    /// and is driven by an already-open stream, not by this broadcast
    /// step.
    async fn send_want_list_to_peer(&self, peer: &PeerId, wants: Vec<Cid>, _full: bool) -> Result<()> {
        let Some(swarm) = &self.swarm else {
            return Ok(());
        };
        for protocol in [
            crate::external::ProtocolId(PROTOCOL_V1_1),
            crate::external::ProtocolId(PROTOCOL_V1_0),
        ] {
            if swarm.dial(peer, protocol).await.is_ok() {
                tracing::debug!(%peer, protocol = protocol.0, wants = wants.len(), "want-list dial succeeded");
                return Ok(());
            }
        }
        Err(Error::ProtocolError(format!("no protocol reachable for peer {peer}")))
    }
}
