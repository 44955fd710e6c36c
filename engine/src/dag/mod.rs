//! Merkle DAG node format and UnixFS metadata.

pub mod node;
pub mod unixfs;

pub use node::{DagLink, DagNode};
pub use unixfs::{Directory, NodeType, UnixFsDataMessage};
