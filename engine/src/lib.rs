#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]
#![deny(unreachable_pub)]

//! # Blockswap Engine
//!
//! A content-addressed block store, a Merkle DAG chunker/builder, a
//! random-access chunked file reader, and a Bitswap-style block-exchange
//! engine — the storage and exchange core of a peer-to-peer file
//! distribution network.
//!
//! The [`facade::Engine`] ties these four pieces together into the single
//! entry point most callers want; the individual modules remain public for
//! callers who only need one piece (e.g. a CLI that just wants [`store::Store`]
//! and [`builder::Builder`], with no network side at all).

/// Test utilities shared between this crate's own tests and downstream
/// crates exercising it against fakes. Enabled with the `test_utils`
/// feature flag.
#[cfg(any(test, feature = "test_utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test_utils")))]
pub mod test_utils;

/// The Bitswap-style block-exchange engine: want registry, per-peer
/// ledgers, wire protocol codecs, and the receive loop that drives a
/// single connection.
pub mod bitswap;
/// The unit of exchange: `DataBlock` and `BlockStat`.
pub mod block;
/// The file chunker and balanced Merkle DAG builder.
pub mod builder;
/// CIDs and multihashes.
pub mod cid;
/// Merkle DAG nodes and the UnixFS-style metadata carried inside them.
pub mod dag;
/// Error types
mod error;
/// The seams this crate expects its embedder to implement: `Router`,
/// `Swarm`, `PeerConnection`, `Stream`, `KeyChain`.
pub mod external;
/// The `Engine` facade composing the store, builder, reader and Bitswap
/// engine into the single object most callers construct.
pub mod facade;
/// A minimal set of pinned root CIDs.
pub mod pin;
/// The random-access chunked file reader.
pub mod reader;
/// The content-addressed block store.
pub mod store;

pub use error::{Error, Result};
pub use facade::Engine;
