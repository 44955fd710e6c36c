use crate::cid::Cid;

/// Errors raised by the block store, DAG builder, chunked reader and
/// Bitswap exchange engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The store has no block for this CID.
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// A `Put` would exceed the configured maximum block size.
    #[error("block too large: {size} bytes exceeds the maximum of {max}")]
    BlockTooLarge {
        /// The size of the rejected block.
        size: u64,
        /// The configured maximum.
        max: u64,
    },

    /// A block's bytes did not hash to the digest carried in its CID.
    #[error("corrupt block {cid}: content does not hash to the expected digest")]
    CorruptBlock {
        /// The CID the bytes were read under.
        cid: Cid,
    },

    /// A feature that is explicitly left unimplemented.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// A wire-protocol frame could not be parsed.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The operation was cooperatively cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// `Engine::start` was called on an already-running facade.
    #[error("engine already started")]
    AlreadyStarted,

    /// The underlying `Router` (`FindProviders`/`Provide`) failed.
    #[error("router error: {0}")]
    RouterError(anyhow::Error),

    /// Disk or socket I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A CID string or byte sequence could not be decoded.
    #[error(transparent)]
    CidError(#[from] crate::cid::CidError),
}

/// Convenience alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;
