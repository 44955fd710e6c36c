//! The Merkle DAG node format: a length-prefixed, protocol-buffer-
//! compatible record of opaque `data` plus an ordered list of links to
//! child nodes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cid::Cid;
use crate::error::{Error, Result};

/// One edge of a [`DagNode`]: a name, the child's [`Cid`], and the
/// recursive size of the DAG the child roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagLink {
    /// The link's name. Empty for builder-generated tree links.
    pub name: String,
    /// The child's content identifier.
    pub id: Cid,
    /// The total byte size of the sub-DAG this link points to.
    pub size: u64,
}

/// A node in the Merkle DAG: opaque payload bytes plus an ordered set
/// of links to children.
///
/// Links are kept in builder order; readers must preserve that order,
/// since UnixFS's `block_sizes[i]` indexes into `links[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    /// The node's payload, typically a serialized `UnixFsDataMessage`.
    pub data: Bytes,
    /// Ordered links to child nodes.
    pub links: Vec<DagLink>,
}

impl DagNode {
    /// Construct a leaf node with payload `data` and no links.
    pub fn leaf(data: Bytes) -> Self {
        Self {
            data,
            links: Vec::new(),
        }
    }

    /// Serialize to the wire form: a length-prefixed record of a
    /// varint link count, then each link (varint name-len, name bytes,
    /// varint CID-byte-len, CID bytes, varint size), then a varint
    /// data length and the data bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        write_varint(self.links.len() as u64, &mut buf);
        for link in &self.links {
            let name_bytes = link.name.as_bytes();
            write_varint(name_bytes.len() as u64, &mut buf);
            buf.put_slice(name_bytes);

            let cid_bytes = link.id.to_bytes();
            write_varint(cid_bytes.len() as u64, &mut buf);
            buf.put_slice(&cid_bytes);

            write_varint(link.size, &mut buf);
        }
        write_varint(self.data.len() as u64, &mut buf);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Parse the wire form produced by [`DagNode::encode`].
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        let link_count = read_varint(&mut bytes)?;
        let mut links = Vec::with_capacity(link_count as usize);
        for _ in 0..link_count {
            let name_len = read_varint(&mut bytes)? as usize;
            if bytes.remaining() < name_len {
                return Err(Error::ProtocolError("truncated link name".into()));
            }
            let name = String::from_utf8(bytes.copy_to_bytes(name_len).to_vec())
                .map_err(|_| Error::ProtocolError("link name is not valid UTF-8".into()))?;

            let cid_len = read_varint(&mut bytes)? as usize;
            if bytes.remaining() < cid_len {
                return Err(Error::ProtocolError("truncated link CID".into()));
            }
            let cid_bytes = bytes.copy_to_bytes(cid_len);
            let id = Cid::from_bytes(&cid_bytes)?;

            let size = read_varint(&mut bytes)?;
            links.push(DagLink { name, id, size });
        }

        let data_len = read_varint(&mut bytes)? as usize;
        if bytes.remaining() < data_len {
            return Err(Error::ProtocolError("truncated node data".into()));
        }
        let data = bytes.copy_to_bytes(data_len);

        Ok(Self { data, links })
    }

    /// The node's CID, computed deterministically from its serialized
    /// bytes. Callers choose the content type (`"dag-pb"` for
    /// builder-produced nodes); [`crate::cid::Cid::for_content`]
    /// resolves v0 vs v1.
    pub fn compute_cid(&self) -> Cid {
        let encoded = self.encode();
        let multihash = crate::cid::Multihash::sha2_256(&encoded);
        Cid::for_content("dag-pb", multihash)
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
