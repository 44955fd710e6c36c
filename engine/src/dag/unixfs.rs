//! UnixFS-style file/directory metadata carried inside a [`DagNode`]'s
//! `data` field.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::dag::node::{DagLink, DagNode};
use crate::error::{Error, Result};

/// The kind of object a [`UnixFsDataMessage`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// An identity leaf or a raw-leaf mode block: no metadata beyond
    /// the bytes themselves.
    Raw,
    /// A file leaf or interior node.
    File,
    /// A directory node.
    Directory,
}

impl NodeType {
    fn to_tag(self) -> u64 {
        match self {
            NodeType::Raw => 0,
            NodeType::File => 1,
            NodeType::Directory => 2,
        }
    }

    fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(NodeType::Raw),
            1 => Ok(NodeType::File),
            2 => Ok(NodeType::Directory),
            other => Err(Error::ProtocolError(format!("unknown UnixFS type tag {other}"))),
        }
    }
}

/// The UnixFS metadata payload stored in `DagNode.data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixFsDataMessage {
    /// The object kind.
    pub node_type: NodeType,
    /// Total byte size of the file this node roots, if applicable.
    pub file_size: Option<u64>,
    /// Per-child byte sizes, for interior file nodes: `block_sizes[i]`
    /// is the size of the sub-DAG at `links[i]`.
    pub block_sizes: Vec<u64>,
    /// The window bytes, for a non-raw-leaves-mode file leaf. `None`
    /// for interior nodes and directories, which carry no content of
    /// their own.
    pub embedded: Option<Bytes>,
}

impl UnixFsDataMessage {
    /// A raw-leaf or identity-leaf message: no file_size, no children.
    pub fn raw() -> Self {
        Self {
            node_type: NodeType::Raw,
            file_size: None,
            block_sizes: Vec::new(),
            embedded: None,
        }
    }

    /// A file leaf whose window is embedded directly (non-raw-leaves
    /// mode): `file_size` equals the window length, no block_sizes.
    pub fn file_leaf(window_len: u64, window: Bytes) -> Self {
        Self {
            node_type: NodeType::File,
            file_size: Some(window_len),
            block_sizes: Vec::new(),
            embedded: Some(window),
        }
    }

    /// An interior file node: `file_size = Σ block_sizes`.
    pub fn file_interior(block_sizes: Vec<u64>) -> Self {
        let file_size = block_sizes.iter().sum();
        Self {
            node_type: NodeType::File,
            file_size: Some(file_size),
            block_sizes,
            embedded: None,
        }
    }

    /// A directory node: no size fields, only links (carried on the
    /// enclosing [`DagNode`]).
    pub fn directory() -> Self {
        Self {
            node_type: NodeType::Directory,
            file_size: None,
            block_sizes: Vec::new(),
            embedded: None,
        }
    }

    /// Serialize with protobuf-style field semantics: a type tag, an
    /// optional presence-prefixed `file_size`, a length-prefixed list
    /// of `block_sizes`, and a presence-prefixed `embedded` blob.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        write_varint(self.node_type.to_tag(), &mut buf);
        match self.file_size {
            Some(size) => {
                buf.put_u8(1);
                write_varint(size, &mut buf);
            }
            None => buf.put_u8(0),
        }
        write_varint(self.block_sizes.len() as u64, &mut buf);
        for size in &self.block_sizes {
            write_varint(*size, &mut buf);
        }
        match &self.embedded {
            Some(data) => {
                buf.put_u8(1);
                write_varint(data.len() as u64, &mut buf);
                buf.put_slice(data);
            }
            None => buf.put_u8(0),
        }
        buf.freeze()
    }

    /// Parse the form produced by [`UnixFsDataMessage::encode`].
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        let tag = read_varint(&mut bytes)?;
        let node_type = NodeType::from_tag(tag)?;

        if !bytes.has_remaining() {
            return Err(Error::ProtocolError("truncated UnixFS message".into()));
        }
        let has_file_size = bytes.get_u8() != 0;
        let file_size = if has_file_size {
            Some(read_varint(&mut bytes)?)
        } else {
            None
        };

        let count = read_varint(&mut bytes)?;
        let mut block_sizes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            block_sizes.push(read_varint(&mut bytes)?);
        }

        if !bytes.has_remaining() {
            return Err(Error::ProtocolError("truncated UnixFS message".into()));
        }
        let has_embedded = bytes.get_u8() != 0;
        let embedded = if has_embedded {
            let len = read_varint(&mut bytes)? as usize;
            if bytes.remaining() < len {
                return Err(Error::ProtocolError("truncated embedded UnixFS data".into()));
            }
            Some(bytes.copy_to_bytes(len))
        } else {
            None
        };

        Ok(Self {
            node_type,
            file_size,
            block_sizes,
            embedded,
        })
    }
}

/// A read-only view over an already-built directory [`DagNode`]: a
/// convenience for listing the named children of a directory without
/// re-decoding its UnixFS message by hand each time.
pub struct Directory<'a> {
    links: &'a [DagLink],
}

impl<'a> Directory<'a> {
    /// Wrap a directory node's links for iteration. Does not itself
    /// validate that `node`'s `data` decodes to a `Directory` message;
    /// callers that need that guarantee should decode `node.data`
    /// first and check `node_type`.
    pub fn new(node: &'a DagNode) -> Self {
        Self { links: &node.links }
    }

    /// Iterate the directory's `(name, link)` entries in link order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &DagLink)> {
        self.links.iter().map(|link| (link.name.as_str(), link))
    }
}

fn write_varint(mut value: u64, buf: &mut BytesMut) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &mut Bytes) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if !bytes.has_remaining() {
            return Err(Error::ProtocolError("truncated varint".into()));
        }
        let byte = bytes.get_u8();
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::ProtocolError("varint too long".into()));
        }
    }
}
