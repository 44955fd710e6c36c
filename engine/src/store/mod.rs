//! The Block Store: persists `(Cid → DataBlock)` rooted at a directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

/// A hook invoked with every block successfully `Put` into a [`Store`],
/// including virtual and identity-hash blocks. The facade wires this to
/// [`crate::bitswap::BitswapEngine::found`], closing the loop (peer
/// on-block-received → Store.Put → Bitswap Found(cid) → waiter
/// resolves) without giving `Store` a compile-time dependency on the
/// Bitswap Engine: build the `Store` and `BitswapEngine` separately,
/// then install this hook.
pub type OnPutHook = Arc<dyn Fn(DataBlock) + Send + Sync>;

use crate::block::DataBlock;
use crate::cid::{Cid, Multihash, StringEncoding};
use crate::dag::{DagNode, UnixFsDataMessage};
use crate::error::{Error, Result};

/// Tunables for the [`Store`], mirroring how the rest of this crate
/// models configuration: a plain struct with a hand-written `Default`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `Put` fails with `BlockTooLarge` above this many bytes.
    pub max_block_size: u64,
    /// Blocks at or below this size are eligible for identity-hash
    /// inlining when `allow_inline_cid` is set.
    pub inline_cid_limit: u64,
    /// Whether the store is allowed to mint identity-hash CIDs at all.
    pub allow_inline_cid: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_block_size: 1024 * 1024,
            inline_cid_limit: 32,
            allow_inline_cid: false,
        }
    }
}

fn empty_dag_node_cid() -> Cid {
    let node = DagNode::leaf(UnixFsDataMessage::raw().encode());
    node.compute_cid()
}

fn empty_directory_cid() -> Cid {
    let node = DagNode::leaf(UnixFsDataMessage::directory().encode());
    node.compute_cid()
}

/// A content-addressed block store persisted as one file per block in a
/// root directory.
///
/// Concurrency: a single process-wide reader/writer lock, any number of
/// concurrent readers or one writer at a time. `tokio`'s `RwLock` gives
/// async-aware fairness without blocking the runtime's worker threads.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    lock: Arc<RwLock<()>>,
    on_put: Arc<RwLock<Option<OnPutHook>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (without creating) a store rooted at `root`, with default
    /// configuration.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, StoreConfig::default())
    }

    /// Open a store rooted at `root` with explicit tunables.
    pub fn with_config(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            root: root.into(),
            config,
            lock: Arc::new(RwLock::new(())),
            on_put: Arc::new(RwLock::new(None)),
        }
    }

    /// Ensure the root directory exists.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Install the hook invoked after every successful `Put` (see
    /// [`OnPutHook`]). Intended to be called once, during facade
    /// wire-up; a later call replaces the previous hook.
    pub async fn set_on_put_hook(&self, hook: OnPutHook) {
        *self.on_put.write().await = Some(hook);
    }

    async fn notify_put(&self, block: &DataBlock) {
        if let Some(hook) = self.on_put.read().await.as_ref() {
            hook(block.clone());
        }
    }

    /// The on-disk filename is `base32(multihash).content-type`. The
    /// extension carries the only part of a [`Cid`] that the multihash
    /// bytes don't already encode, so `names()` can rebuild the exact
    /// original `Cid` (version included) instead of guessing `dag-pb`.
    fn path_for(&self, cid: &Cid) -> PathBuf {
        let name = data_encoding::BASE32_NOPAD
            .encode(&cid.multihash.to_bytes())
            .to_lowercase();
        self.root.join(format!("{name}.{}", cid.content_type))
    }

    fn virtual_block(cid: &Cid) -> Option<DataBlock> {
        if cid.is_identity() {
            return Some(DataBlock::from_parts(
                cid.clone(),
                Bytes::from(cid.multihash.digest.clone()),
            ));
        }
        if *cid == empty_dag_node_cid() {
            let node = DagNode::leaf(UnixFsDataMessage::raw().encode());
            return Some(DataBlock::from_parts(cid.clone(), node.encode()));
        }
        if *cid == empty_directory_cid() {
            let node = DagNode::leaf(UnixFsDataMessage::directory().encode());
            return Some(DataBlock::from_parts(cid.clone(), node.encode()));
        }
        None
    }

    /// Store `block` under its own CID, atomically replacing any
    /// existing file with the same key.
    ///
    /// Virtual and identity-hash blocks are accepted but never written
    /// to disk.
    #[tracing::instrument(skip(self, block), fields(cid = %block.id))]
    pub async fn put(&self, block: &DataBlock) -> Result<()> {
        if block.size > self.config.max_block_size {
            return Err(Error::BlockTooLarge {
                size: block.size,
                max: self.config.max_block_size,
            });
        }

        if block.id.is_identity() || Self::virtual_block(&block.id).is_some() {
            tracing::trace!("skipping persistence of virtual/identity block");
            self.notify_put(block).await;
            return Ok(());
        }

        let _guard = self.lock.write().await;
        let final_path = self.path_for(&block.id);
        let tmp_path = final_path.with_extension("tmp");

        let write_result = tokio::fs::write(&tmp_path, block.bytes.as_ref()).await;
        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::IoError(err));
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::IoError(err));
        }
        drop(_guard);

        self.notify_put(block).await;
        Ok(())
    }

    /// Fetch `cid`, returning `None` if it isn't present.
    #[tracing::instrument(skip(self), fields(cid = %cid))]
    pub async fn try_get(&self, cid: &Cid) -> Result<Option<DataBlock>> {
        if let Some(block) = Self::virtual_block(cid) {
            return Ok(Some(block));
        }

        let _guard = self.lock.read().await;
        let path = self.path_for(cid);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(DataBlock::from_parts(cid.clone(), Bytes::from(bytes)))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::IoError(err)),
        }
    }

    /// Fetch `cid`, failing with `NotFound` if it isn't present.
    pub async fn get(&self, cid: &Cid) -> Result<DataBlock> {
        self.try_get(cid)
            .await?
            .ok_or_else(|| Error::NotFound(cid.clone()))
    }

    /// Whether a block for `cid` is available.
    pub async fn exists(&self, cid: &Cid) -> Result<bool> {
        Ok(self.try_get(cid).await?.is_some())
    }

    /// The size in bytes of the block for `cid`, if present.
    pub async fn length(&self, cid: &Cid) -> Result<Option<u64>> {
        Ok(self.try_get(cid).await?.map(|block| block.size))
    }

    /// Remove the block for `cid`, if present. A no-op for virtual and
    /// identity-hash blocks, which were never written.
    pub async fn remove(&self, cid: &Cid) -> Result<()> {
        if cid.is_identity() || Self::virtual_block(cid).is_some() {
            return Ok(());
        }

        let _guard = self.lock.write().await;
        let path = self.path_for(cid);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::IoError(err)),
        }
    }

    /// Lazily enumerate every CID persisted in the store. Unlike `Get`,
    /// this reads directory entries, not file contents, and does not
    /// surface virtual/identity blocks (they aren't "in" the store).
    pub async fn names(&self) -> Result<Vec<Cid>> {
        let _guard = self.lock.read().await;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut cids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.ends_with(".tmp") {
                continue;
            }
            let Some((stem, content_type)) = name.split_once('.') else {
                continue;
            };
            let Ok(bytes) = data_encoding::BASE32_NOPAD.decode(stem.to_uppercase().as_bytes())
            else {
                continue;
            };
            let Ok((multihash, _)) = Multihash::decode(&bytes) else {
                continue;
            };
            cids.push(Cid::for_content(content_type, multihash));
        }
        Ok(cids)
    }

    /// Root directory this store persists to.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Whether `bytes` is small enough, and inlining is enabled, for an
    /// identity-hash CID rather than a persisted block.
    pub fn should_inline(&self, byte_len: u64) -> bool {
        self.config.allow_inline_cid && byte_len <= self.config.inline_cid_limit
    }

    /// Build the CID this store would assign to `bytes` of the given
    /// content type, honoring the inline-CID configuration.
    pub fn cid_for(&self, content_type: &str, bytes: &[u8]) -> Cid {
        if self.should_inline(bytes.len() as u64) {
            return Cid::v1(
                content_type.to_string(),
                Multihash::identity(bytes),
                StringEncoding::Base32Lower,
            );
        }
        Cid::for_content(content_type, Multihash::sha2_256(bytes))
    }
}
