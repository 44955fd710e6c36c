//! Wire encoding for Bitswap protocol versions 1.0.0 and 1.1.0.
//!
//! Both variants carry the same abstract message shape; they differ in
//! how a want-list entry's `block_key` and a payload block's bytes are
//! framed. Streams carry length-prefixed records of whichever encoding
//! below applies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::block::DataBlock;
use crate::cid::{Cid, Multihash, StringEncoding};
use crate::error::{Error, Result};

/// `/ipfs/bitswap/1.0.0`: CIDv0 (raw multihash) keys, flat block bytes.
pub const PROTOCOL_ID_V1_0: &str = "/ipfs/bitswap/1.0.0";
/// `/ipfs/bitswap/1.1.0`: CIDv1 keys, content-type/hash-prefixed blocks.
pub const PROTOCOL_ID_V1_1: &str = "/ipfs/bitswap/1.1.0";

/// Which wire encoding a stream is speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `/ipfs/bitswap/1.0.0`.
    V1_0,
    /// `/ipfs/bitswap/1.1.0`.
    V1_1,
}

impl ProtocolVersion {
    /// Whether a receive loop on this version processes exactly one
    /// message per stream (`V1_0`) or loops until the stream closes
    /// (`V1_1`).
    pub fn single_message_per_stream(self) -> bool {
        matches!(self, ProtocolVersion::V1_0)
    }
}

/// One entry of a [`Wantlist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantlistEntry {
    /// `CIDv0` multihash bytes under v1.0, `CIDv1` bytes under v1.1.
    pub block_key: Bytes,
    /// Caller-assigned priority; the default is `1`.
    pub priority: i32,
    /// Whether this entry cancels a previous want rather than adding
    /// one.
    pub cancel: bool,
}

/// The want-list half of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Wantlist {
    /// Whether this is a complete replacement of the receiver's
    /// understanding of our wants (vs. an incremental update).
    pub full: bool,
    /// The entries themselves.
    pub entries: Vec<WantlistEntry>,
}

/// A Bitswap wire message: a want-list update plus zero or more blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// The want-list portion.
    pub wantlist: Wantlist,
    /// Blocks being pushed to the peer.
    pub payload: Vec<DataBlock>,
}

impl Message {
    /// Build the entry + fresh-wantlist form of a single `Want` or
    /// `Cancel`.
    pub fn single_want(block_key: Bytes, cancel: bool, full: bool) -> Self {
        Self {
            wantlist: Wantlist {
                full,
                entries: vec![WantlistEntry {
                    block_key,
                    priority: 1,
                    cancel,
                }],
            },
            payload: Vec::new(),
        }
    }

    /// Build a message carrying a single block and an empty want-list,
    /// the shape `GetBlockForRemote` sends in response to a want.
    pub fn single_block(block: DataBlock) -> Self {
        Self {
            wantlist: Wantlist::default(),
            payload: vec![block],
        }
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

fn write_bytes_field(bytes: &[u8], buf: &mut BytesMut) {
    write_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

fn read_bytes_field(bytes: &mut Bytes) -> Result<Bytes> {
    let len = read_varint(bytes)? as usize;
    if bytes.remaining() < len {
        return Err(Error::ProtocolError("truncated length-prefixed field".into()));
    }
    Ok(bytes.copy_to_bytes(len))
}

fn encode_wantlist(wantlist: &Wantlist, buf: &mut BytesMut) {
    buf.put_u8(if wantlist.full { 1 } else { 0 });
    write_varint(wantlist.entries.len() as u64, buf);
    for entry in &wantlist.entries {
        write_bytes_field(&entry.block_key, buf);
        write_varint(entry.priority as u64, buf);
        buf.put_u8(if entry.cancel { 1 } else { 0 });
    }
}

fn decode_wantlist(bytes: &mut Bytes) -> Result<Wantlist> {
    if !bytes.has_remaining() {
        return Err(Error::ProtocolError("truncated wantlist".into()));
    }
    let full = bytes.get_u8() != 0;
    let count = read_varint(bytes)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let block_key = read_bytes_field(bytes)?;
        let priority = read_varint(bytes)? as i32;
        if !bytes.has_remaining() {
            return Err(Error::ProtocolError("truncated wantlist entry".into()));
        }
        let cancel = bytes.get_u8() != 0;
        entries.push(WantlistEntry {
            block_key,
            priority,
            cancel,
        });
    }
    Ok(Wantlist { full, entries })
}

fn encode_block_v1_0(block: &DataBlock, buf: &mut BytesMut) {
    write_bytes_field(&block.bytes, buf);
}

fn decode_block_v1_0(bytes: &mut Bytes) -> Result<DataBlock> {
    let data = read_bytes_field(bytes)?;
    let multihash = Multihash::sha2_256(&data);
    let id = Cid::v0(multihash);
    Ok(DataBlock::from_parts(id, data))
}

fn codec_code_for(content_type: &str) -> u64 {
    match content_type {
        "raw" => 0x55,
        "dag-pb" => 0x70,
        "dag-cbor" => 0x71,
        _ => 0x55,
    }
}

fn codec_name_for(code: u64) -> String {
    match code {
        0x55 => "raw".to_string(),
        0x70 => "dag-pb".to_string(),
        0x71 => "dag-cbor".to_string(),
        other => format!("unknown-0x{other:x}"),
    }
}

fn encode_block_v1_1(block: &DataBlock, buf: &mut BytesMut) {
    let version = match block.id.version {
        crate::cid::Version::V0 => 0u64,
        crate::cid::Version::V1 => 1u64,
    };
    write_varint(version, buf);
    write_varint(codec_code_for(&block.id.content_type), buf);
    write_varint(block.id.multihash.algorithm_code, buf);
    write_varint(block.id.multihash.digest.len() as u64, buf);
    write_bytes_field(&block.bytes, buf);
}

fn decode_block_v1_1(bytes: &mut Bytes) -> Result<DataBlock> {
    let version = read_varint(bytes)?;
    let codec = read_varint(bytes)?;
    let hash_algo = read_varint(bytes)?;
    let _hash_len = read_varint(bytes)?;
    let data = read_bytes_field(bytes)?;

    let multihash = match hash_algo {
        crate::cid::SHA2_256_CODE => Multihash::sha2_256(&data),
        crate::cid::IDENTITY_CODE => Multihash::identity(&data),
        other => return Err(Error::ProtocolError(format!("unsupported hash algo 0x{other:x}"))),
    };

    let content_type = codec_name_for(codec);
    let id = match version {
        0 => Cid::v0(multihash),
        1 => Cid::v1(content_type, multihash, StringEncoding::Base32Lower),
        other => return Err(Error::ProtocolError(format!("unsupported CID version {other}"))),
    };
    Ok(DataBlock::from_parts(id, data))
}

/// Serialize `message` per `version`. The result is one length-prefixed
/// record; callers write the length prefix when framing onto a stream.
pub fn encode_message(message: &Message, version: ProtocolVersion) -> Bytes {
    let mut buf = BytesMut::new();
    encode_wantlist(&message.wantlist, &mut buf);
    write_varint(message.payload.len() as u64, &mut buf);
    for block in &message.payload {
        match version {
            ProtocolVersion::V1_0 => encode_block_v1_0(block, &mut buf),
            ProtocolVersion::V1_1 => encode_block_v1_1(block, &mut buf),
        }
    }
    buf.freeze()
}

/// Parse the form produced by [`encode_message`].
pub fn decode_message(mut bytes: Bytes, version: ProtocolVersion) -> Result<Message> {
    let wantlist = decode_wantlist(&mut bytes)?;
    let count = read_varint(&mut bytes)?;
    let mut payload = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let block = match version {
            ProtocolVersion::V1_0 => decode_block_v1_0(&mut bytes)?,
            ProtocolVersion::V1_1 => decode_block_v1_1(&mut bytes)?,
        };
        payload.push(block);
    }
    Ok(Message { wantlist, payload })
}

/// Frame `bytes` with a varint length prefix for writing to a stream.
pub fn frame(bytes: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(bytes.len() + 8);
    write_varint(bytes.len() as u64, &mut buf);
    buf.put_slice(bytes);
    buf.freeze()
}

/// Read one length-prefixed record from `bytes`, returning the record
/// and the number of bytes consumed including the prefix.
pub fn read_frame(bytes: &[u8]) -> Result<(Bytes, usize)> {
    let mut cursor = Bytes::copy_from_slice(bytes);
    let len = read_varint(&mut cursor)? as usize;
    let prefix_len = bytes.len() - cursor.len();
    if cursor.remaining() < len {
        return Err(Error::ProtocolError("truncated frame".into()));
    }
    let record = cursor.copy_to_bytes(len);
    Ok((record, prefix_len + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as TestBytes;

    #[test]
    fn v1_0_block_round_trips_by_rehashing() {
        let block = DataBlock::new_raw(TestBytes::from_static(b"v1.0 block"));
        let message = Message::single_block(block.clone());
        let encoded = encode_message(&message, ProtocolVersion::V1_0);
        let decoded = decode_message(encoded, ProtocolVersion::V1_0).unwrap();
        assert_eq!(decoded.payload[0].bytes, block.bytes);
        assert_eq!(decoded.payload[0].id.multihash, block.id.multihash);
    }

    #[test]
    fn v1_1_block_round_trips_with_explicit_prefix() {
        let block = DataBlock::new_raw(TestBytes::from_static(b"v1.1 block"));
        let message = Message::single_block(block.clone());
        let encoded = encode_message(&message, ProtocolVersion::V1_1);
        let decoded = decode_message(encoded, ProtocolVersion::V1_1).unwrap();
        assert_eq!(decoded.payload[0], block);
    }

    #[test]
    fn wantlist_entries_round_trip() {
        let message = Message::single_want(TestBytes::from_static(b"somekey"), true, false);
        let encoded = encode_message(&message, ProtocolVersion::V1_1);
        let decoded = decode_message(encoded, ProtocolVersion::V1_1).unwrap();
        assert_eq!(decoded.wantlist.entries.len(), 1);
        assert!(decoded.wantlist.entries[0].cancel);
        assert!(!decoded.wantlist.full);
    }

    #[test]
    fn frame_and_read_frame_round_trip() {
        let payload = TestBytes::from_static(b"hello frame");
        let framed = frame(&payload);
        let (record, consumed) = read_frame(&framed).unwrap();
        assert_eq!(record, payload);
        assert_eq!(consumed, framed.len());
    }

    #[test]
    fn v1_0_is_single_message_per_stream() {
        assert!(ProtocolVersion::V1_0.single_message_per_stream());
        assert!(!ProtocolVersion::V1_1.single_message_per_stream());
    }
}
