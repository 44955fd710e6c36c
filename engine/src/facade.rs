//! Engine Facade: lazily constructs and wires the store, builder,
//! reader and Bitswap engine together, and owns `Start`/`Stop`
//! lifecycle.
//!
//! The store-to-bitswap edge of the closed loop (`peer
//! on-block-received → Store.Put → Bitswap.Found(cid) → waiter
//! resolves`) is wired here, at `start()`, via [`Store::set_on_put_hook`]
//! — breaking a cyclic dependency by constructing both halves
//! independently, then connecting them. A second background task, also
//! started here, drains [`BitswapEngine::block_needed_events`] and turns
//! each into a `Router::find_providers` lookup, registering any provider
//! found with the swarm so a later want-list broadcast can reach it —
//! the other half of a `Get` miss's control flow.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bitswap::{BitswapConfig, BitswapEngine, BitswapStats};
use crate::block::{BlockStat, DataBlock};
use crate::builder::{Builder, ChunkerOptions};
use crate::cid::Cid;
use crate::dag::{DagNode, Directory};
use crate::error::{Error, Result};
use crate::external::{NoopRouter, PeerId, Router, Swarm};
use crate::pin::PinSet;
use crate::reader::ChunkedReader;
use crate::store::{Store, StoreConfig};

/// Tunables for the facade as a whole, composing the store's sizing
/// config plus the Bitswap engine's own.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Passed through to the [`Store`].
    pub store: StoreConfig,
    /// Passed through to the [`BitswapEngine`].
    pub bitswap: BitswapConfig,
}

/// Repository-wide block count and total size, computed by walking the
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryStats {
    /// Number of blocks persisted in the store.
    pub num_blocks: u64,
    /// Total bytes across all persisted blocks.
    pub repo_size: u64,
}

/// Aggregate bytes moved in each direction, derived from the Bitswap
/// ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthStats {
    /// Total bytes received from any peer.
    pub total_in: u64,
    /// Total bytes sent to any peer.
    pub total_out: u64,
}

/// A combined Bitswap, repository, and bandwidth statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Bitswap exchange counters and the current want-list.
    pub bitswap: BitswapStats,
    /// Store size and block count.
    pub repository: RepositoryStats,
    /// Bytes moved in each direction.
    pub bandwidth: BandwidthStats,
}

/// A named, sized entry of a directory or interior file node, returned
/// by [`FileSystemHandle::list_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// The link's name, empty for an interior file node's children.
    pub name: String,
    /// The child's CID.
    pub cid: Cid,
    /// The child's recorded size.
    pub size: u64,
}

/// A handle over the content-addressed block operations: get, put,
/// stat, and remove.
#[derive(Clone)]
pub struct BlockHandle {
    store: Store,
    bitswap: Arc<BitswapEngine>,
    local_peer: PeerId,
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("local_peer", &self.local_peer)
            .finish_non_exhaustive()
    }
}

impl BlockHandle {
    /// Fetch `cid`, pulling it from the network via `WantAsync` on a
    /// local miss.
    pub async fn get(&self, cid: &Cid) -> Result<DataBlock> {
        self.get_cancellable(cid, CancellationToken::new()).await
    }

    /// As [`BlockHandle::get`], but cooperatively cancellable — a want
    /// registered on a network miss can be abandoned by cancelling
    /// `cancel` without disturbing any other caller's want for the same
    /// CID.
    pub async fn get_cancellable(&self, cid: &Cid, cancel: CancellationToken) -> Result<DataBlock> {
        if let Some(block) = self.store.try_get(cid).await? {
            return Ok(block);
        }
        self.bitswap
            .want_async(cid.clone(), self.local_peer.clone(), cancel)
            .await
    }

    /// Persist `block`. The facade's `on_put` hook (installed at
    /// `Engine::start`) resolves any waiter on `block.id` as a side
    /// effect of this call.
    pub async fn put(&self, block: &DataBlock) -> Result<()> {
        self.store.put(block).await
    }

    /// This block's size, without fetching its bytes over the network
    /// on a miss.
    pub async fn stat(&self, cid: &Cid) -> Result<BlockStat> {
        let block = self.store.get(cid).await?;
        Ok(BlockStat::from(&block))
    }

    /// Remove `cid` from the local store. Never reaches onto the
    /// network.
    pub async fn remove(&self, cid: &Cid) -> Result<()> {
        self.store.remove(cid).await
    }
}

/// A handle over the file-system-shaped DAG operations: add a stream,
/// add a directory, add a file, list a directory, and read a file back.
#[derive(Clone)]
pub struct FileSystemHandle {
    store: Store,
    builder: Arc<Builder>,
}

impl std::fmt::Debug for FileSystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemHandle").finish_non_exhaustive()
    }
}

impl FileSystemHandle {
    /// Chunk and build a DAG over `input`.
    pub async fn add_stream(
        &self,
        input: impl tokio::io::AsyncRead + Unpin,
        options: &ChunkerOptions,
    ) -> Result<Cid> {
        self.builder.add_stream(input, options).await
    }

    /// Chunk and build a DAG over an in-memory buffer.
    pub async fn add_file(&self, bytes: bytes::Bytes, options: &ChunkerOptions) -> Result<Cid> {
        self.builder.add_stream(bytes.as_ref(), options).await
    }

    /// Link already-built children into one directory node.
    pub async fn add_directory(&self, entries: Vec<(String, Cid, u64)>) -> Result<Cid> {
        self.builder.add_directory(entries).await
    }

    /// List the named, sized children of the node rooted at `root` —
    /// a directory's entries, or an interior file node's chunk links.
    pub async fn list_file(&self, root: &Cid) -> Result<Vec<DirectoryEntry>> {
        let block = self.store.get(root).await?;
        let node = DagNode::decode(block.bytes.clone())?;
        Ok(Directory::new(&node)
            .entries()
            .map(|(name, link)| DirectoryEntry {
                name: name.to_string(),
                cid: link.id.clone(),
                size: link.size,
            })
            .collect())
    }

    /// Open a random-access reader over the file DAG rooted at `root`.
    pub async fn read_file<'a>(&'a self, root: &Cid) -> Result<ChunkedReader<'a>> {
        ChunkedReader::open(&self.store, root).await
    }
}

/// Whether the facade is currently started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
}

/// Wires the Block Store, DAG Builder, Chunked Reader and Bitswap
/// Engine together; owns `Start`/`Stop` lifecycle.
pub struct Engine {
    store: Store,
    builder: Arc<Builder>,
    bitswap: Arc<BitswapEngine>,
    router: Arc<dyn Router>,
    swarm: Option<Arc<dyn Swarm>>,
    pins: PinSet,
    local_peer: PeerId,
    run_state: RwLock<RunState>,
    router_task: RwLock<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("local_peer", &self.local_peer)
            .field("has_swarm", &self.swarm.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build a facade rooted at `root`, with no router or swarm:
    /// pin advertisement, want-list broadcast and provider lookup all
    /// become no-ops, leaving only the local store and builder useful.
    pub fn new(root: impl Into<PathBuf>, local_peer: PeerId, config: EngineConfig) -> Self {
        let store = Store::with_config(root, config.store);
        let bitswap = Arc::new(BitswapEngine::new(store.clone(), &config.bitswap));
        let builder = Arc::new(Builder::new(store.clone()));
        Self {
            store,
            builder,
            bitswap,
            router: Arc::new(NoopRouter),
            swarm: None,
            pins: PinSet::new(),
            local_peer,
            run_state: RwLock::new(RunState::Stopped),
            router_task: RwLock::new(None),
        }
    }

    /// Build a facade with a real [`Router`] and [`Swarm`], enabling pin
    /// advertisement, want-list broadcast, and provider lookup.
    pub fn with_network(
        root: impl Into<PathBuf>,
        local_peer: PeerId,
        config: EngineConfig,
        router: Arc<dyn Router>,
        swarm: Arc<dyn Swarm>,
    ) -> Self {
        let store = Store::with_config(root, config.store);
        let bitswap = Arc::new(BitswapEngine::with_swarm(
            store.clone(),
            &config.bitswap,
            swarm.clone(),
        ));
        let builder = Arc::new(Builder::with_router(store.clone(), router.clone()));
        Self {
            store,
            builder,
            bitswap,
            router,
            swarm: Some(swarm),
            pins: PinSet::new(),
            local_peer,
            run_state: RwLock::new(RunState::Stopped),
            router_task: RwLock::new(None),
        }
    }

    /// Ensure the on-disk root exists, wire the store's `on_put` hook to
    /// `Bitswap.Found`, start the Bitswap engine, and spawn the
    /// provider-lookup background task. A second `Start` on an
    /// already-running facade returns [`Error::AlreadyStarted`].
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.run_state.write().await;
        if *state == RunState::Running {
            return Err(Error::AlreadyStarted);
        }

        self.store.init().await?;

        let bitswap_for_hook = self.bitswap.clone();
        self.store
            .set_on_put_hook(Arc::new(move |block: DataBlock| {
                let bitswap = bitswap_for_hook.clone();
                tokio::spawn(async move {
                    bitswap.found(&block.id, &block).await;
                });
            }))
            .await;

        self.bitswap.start().await?;

        let mut events = self.bitswap.block_needed_events();
        let router = self.router.clone();
        let swarm = self.swarm.clone();
        let task = tokio::spawn(async move {
            loop {
                let cid = match events.recv().await {
                    Ok(cid) => cid,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let router = router.clone();
                let swarm = swarm.clone();
                tokio::spawn(async move {
                    use futures::StreamExt;
                    let Ok(mut providers) = router.find_providers(&cid, 20).await else {
                        return;
                    };
                    while let Some(peer) = providers.next().await {
                        if let Some(swarm) = &swarm {
                            swarm.register_peer(&peer);
                        }
                    }
                });
            }
        });
        *self.router_task.write().await = Some(task);

        *state = RunState::Running;
        Ok(())
    }

    /// Stop the Bitswap engine and abort the provider-lookup task.
    /// Always safe, including when already stopped.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        let mut state = self.run_state.write().await;
        self.bitswap.stop().await;
        if let Some(task) = self.router_task.write().await.take() {
            task.abort();
        }
        *state = RunState::Stopped;
    }

    /// The `Block.Get/Put/Stat/Remove` handle.
    pub fn block(&self) -> BlockHandle {
        BlockHandle {
            store: self.store.clone(),
            bitswap: self.bitswap.clone(),
            local_peer: self.local_peer.clone(),
        }
    }

    /// The `FileSystem.AddStream/AddDirectory/AddFile/ListFile/ReadFile`
    /// handle.
    pub fn file_system(&self) -> FileSystemHandle {
        FileSystemHandle {
            store: self.store.clone(),
            builder: self.builder.clone(),
        }
    }

    /// The underlying Bitswap engine, for `Wants`/`Unwant`/`LedgerFor`.
    pub fn bitswap(&self) -> Arc<BitswapEngine> {
        self.bitswap.clone()
    }

    /// The configured router.
    pub fn router(&self) -> Arc<dyn Router> {
        self.router.clone()
    }

    /// The configured swarm, if any.
    pub fn swarm(&self) -> Option<Arc<dyn Swarm>> {
        self.swarm.clone()
    }

    /// The facade's pin set.
    pub fn pins(&self) -> &PinSet {
        &self.pins
    }

    /// A combined Bitswap, repository, and bandwidth statistics
    /// snapshot.
    pub async fn stats(&self) -> Result<Stats> {
        let bitswap = self.bitswap.statistics().await;
        let repository = self.repository_stats().await?;
        let bandwidth = BandwidthStats {
            total_in: bitswap.data_received,
            total_out: bitswap.data_sent,
        };
        Ok(Stats {
            bitswap,
            repository,
            bandwidth,
        })
    }

    async fn repository_stats(&self) -> Result<RepositoryStats> {
        let names = self.store.names().await?;
        let mut repo_size = 0u64;
        for cid in &names {
            repo_size += self.store.length(cid).await?.unwrap_or(0);
        }
        Ok(RepositoryStats {
            num_blocks: names.len() as u64,
            repo_size,
        })
    }
}
