//! Narrow trait contracts this crate consumes but does not implement:
//! peer routing/provider advertisement, the swarm's connection and
//! protocol lifecycle, and key material lookup.
//!
//! Command dispatch, DHT lookup, transport negotiation and DNS/IPNS are
//! all on the other side of these traits and out of scope here.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::cid::Cid;
use crate::error::Result;

/// A libp2p-style peer identifier. Opaque to this crate beyond equality
/// and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A wire-protocol identifier, e.g. `/ipfs/bitswap/1.1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(pub &'static str);

/// Provider-lookup and advertisement, consumed by the Bitswap Engine
/// (`BlockNeeded` reaction) and the DAG Builder (`pin` advertisement).
#[async_trait]
pub trait Router: Send + Sync {
    /// Stream of peers known to have `cid`, up to `limit` results.
    async fn find_providers(&self, cid: &Cid, limit: usize) -> Result<BoxStream<'_, PeerId>>;

    /// Announce that this node has `cid`. `advertise` requests active
    /// propagation (e.g. DHT provide) rather than passive availability.
    async fn provide(&self, cid: &Cid, advertise: bool) -> Result<()>;
}

/// A single established connection to a remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// The peer at the other end of this connection.
    fn remote_peer(&self) -> PeerId;

    /// Resolves once the identity handshake for this connection has
    /// completed. Bitswap MUST await this before sending anything.
    async fn identity_established(&self);
}

/// Connection and protocol lifecycle, consumed by the Bitswap Engine to
/// register its wire protocols and react to new connections.
#[async_trait]
pub trait Swarm: Send + Sync {
    /// Open an outbound stream to `peer` speaking `protocol`.
    async fn dial(&self, peer: &PeerId, protocol: ProtocolId) -> Result<Box<dyn Stream>>;

    /// Peers currently known to the swarm, connected or not.
    fn known_peers(&self) -> Vec<PeerId>;

    /// Register a protocol handler; inbound streams for it are
    /// delivered out-of-band (the concrete swarm implementation decides
    /// how).
    fn add_protocol(&self, protocol: ProtocolId);

    /// Unregister a previously added protocol.
    fn remove_protocol(&self, protocol: ProtocolId);

    /// Mark `peer` as one this node wants to stay connected to.
    fn register_peer(&self, peer: &PeerId);
}

/// A bidirectional byte stream, already framed at the transport layer.
/// Reading and writing length-prefixed protocol-buffer records happens
/// on top of this.
pub trait Stream: Send + Sync {
    /// Read the next available chunk, or `None` at end of stream.
    fn read<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + 'a>>;

    /// Write `bytes` and flush.
    fn write<'a>(&'a mut self, bytes: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Key material lookup, consumed for optional decryption in the
/// Chunked Reader.
#[async_trait]
pub trait KeyChain: Send + Sync {
    /// Find a key by its human-readable name.
    fn find_key_by_name(&self, name: &str) -> Option<PeerId>;

    /// Fetch the private key material for a previously found key.
    async fn get_private_key(&self, name: &str) -> Result<Option<Bytes>>;
}

/// A `Router`/`Swarm`/`KeyChain` that does nothing, for use where the
/// engine is exercised without real networking (unit tests, `only_hash`
/// builder runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRouter;

#[async_trait]
impl Router for NoopRouter {
    async fn find_providers(&self, _cid: &Cid, _limit: usize) -> Result<BoxStream<'_, PeerId>> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn provide(&self, _cid: &Cid, _advertise: bool) -> Result<()> {
        Ok(())
    }
}
