//! Want registry, ledgers, and the Bitswap exchange engine.

pub mod engine;
pub mod ledger;
pub mod protocol;
pub mod session;
pub mod want_registry;

pub use engine::{BitswapConfig, BitswapEngine};
pub use ledger::{BitswapStats, LedgerSnapshot};
pub use want_registry::WantRegistry;
