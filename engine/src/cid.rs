//! Self-describing content identifiers and multihashes.
//!
//! This is a small, purpose-built implementation rather than a wrapper
//! around the `cid`/`multihash` crates: a CID here carries a
//! `content_type` as a plain string (not a multicodec table) and an
//! `encoding` that picks the *string* representation independently of the
//! CID version, which doesn't map cleanly onto those crates' APIs.

use data_encoding::Encoding;
use std::fmt;

/// The multihash code reserved for identity hashes: the "digest" is the
/// content itself.
pub const IDENTITY_CODE: u64 = 0x00;
/// The multihash code for SHA2-256, the default algorithm.
pub const SHA2_256_CODE: u64 = 0x12;

const BASE32_LOWER_NOPAD: Encoding = data_encoding::BASE32_NOPAD;

/// Errors raised while parsing or decoding a CID or multihash.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CidError {
    /// The string didn't use a recognized encoding or prefix.
    #[error("unrecognized CID string encoding")]
    UnknownEncoding,
    /// The varint-prefixed byte form was truncated or malformed.
    #[error("malformed CID bytes")]
    MalformedBytes,
    /// The string's base encoding reported for decoding is unsupported.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    /// The underlying base-encoded payload failed to decode.
    #[error("base decoding failed: {0}")]
    BaseDecodeFailed(String),
}

/// `(algorithm_code, digest_bytes)`, the hash half of a CID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Multihash {
    /// The multicodec code identifying the hash function (or `identity`).
    pub algorithm_code: u64,
    /// The raw digest bytes.
    pub digest: Vec<u8>,
}

impl Multihash {
    /// Whether this is an identity hash, i.e. the digest *is* the content.
    pub fn is_identity(&self) -> bool {
        self.algorithm_code == IDENTITY_CODE
    }

    /// Hash `bytes` with SHA2-256.
    pub fn sha2_256(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(bytes).to_vec();
        Self {
            algorithm_code: SHA2_256_CODE,
            digest,
        }
    }

    /// Wrap `bytes` as an identity hash (inlined content).
    pub fn identity(bytes: &[u8]) -> Self {
        Self {
            algorithm_code: IDENTITY_CODE,
            digest: bytes.to_vec(),
        }
    }

    /// Encode as `varint(code) || varint(len) || digest`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digest.len() + 8);
        write_varint(self.algorithm_code, &mut out);
        write_varint(self.digest.len() as u64, &mut out);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Decode the `varint(code) || varint(len) || digest` form, returning
    /// the multihash and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), CidError> {
        let (code, n1) = read_varint(bytes)?;
        let (len, n2) = read_varint(&bytes[n1..])?;
        let start = n1 + n2;
        let end = start
            .checked_add(len as usize)
            .ok_or(CidError::MalformedBytes)?;
        let digest = bytes.get(start..end).ok_or(CidError::MalformedBytes)?;
        Ok((
            Self {
                algorithm_code: code,
                digest: digest.to_vec(),
            },
            end,
        ))
    }
}

/// CID version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// Bare base58btc multihash, implicit `dag-pb`/`sha2-256`.
    V0,
    /// `version || content-type || multihash`, any base encoding.
    V1,
}

/// The string representation a CID's `Encode()` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringEncoding {
    /// Base58-btc, no multibase prefix (used by CIDv0 and optionally v1).
    Base58Btc,
    /// Lowercase, unpadded base32 with a `b` multibase-style prefix.
    Base32Lower,
}

/// A self-describing content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cid {
    /// CID version.
    pub version: Version,
    /// The codec/content-type name, e.g. `"dag-pb"` or `"raw"`.
    pub content_type: String,
    /// The content hash.
    pub multihash: Multihash,
    /// The string encoding `Encode()` uses for this CID.
    pub encoding: StringEncoding,
}

impl Cid {
    /// Build a CIDv0: implicit `dag-pb`/`sha2-256`, base58btc string form.
    pub fn v0(multihash: Multihash) -> Self {
        Self {
            version: Version::V0,
            content_type: "dag-pb".to_string(),
            multihash,
            encoding: StringEncoding::Base58Btc,
        }
    }

    /// Build a CIDv1 with the given content type and string encoding.
    pub fn v1(content_type: impl Into<String>, multihash: Multihash, encoding: StringEncoding) -> Self {
        Self {
            version: Version::V1,
            content_type: content_type.into(),
            multihash,
            encoding,
        }
    }

    /// The default CID the DAG builder assigns to a block: v0 when the
    /// content is `dag-pb`/`sha2-256`, v1 otherwise.
    pub fn for_content(content_type: &str, multihash: Multihash) -> Self {
        if content_type == "dag-pb" && multihash.algorithm_code == SHA2_256_CODE {
            Self::v0(multihash)
        } else {
            Self::v1(content_type.to_string(), multihash, StringEncoding::Base32Lower)
        }
    }

    /// Whether this CID inlines its content (identity multihash).
    pub fn is_identity(&self) -> bool {
        self.multihash.is_identity()
    }

    /// Encode to the canonical wire byte form.
    ///
    /// v0: the bare multihash bytes. v1: `varint(1) || varint(codec) ||
    /// multihash`, where `codec` is resolved from `content_type`.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.version {
            Version::V0 => self.multihash.to_bytes(),
            Version::V1 => {
                let mut out = Vec::new();
                write_varint(1, &mut out);
                write_varint(codec_code(&self.content_type), &mut out);
                out.extend_from_slice(&self.multihash.to_bytes());
                out
            }
        }
    }

    /// Parse the canonical wire byte form produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        // A bare multihash (CIDv0) always starts with the sha2-256 code,
        // whose varint is the single byte 0x12 -- never a valid CID
        // version varint (which is always 0 or 1).
        if bytes.first() == Some(&(SHA2_256_CODE as u8)) {
            let (multihash, _) = Multihash::decode(bytes)?;
            return Ok(Self::v0(multihash));
        }

        let (version, n1) = read_varint(bytes)?;
        if version != 1 {
            return Err(CidError::MalformedBytes);
        }
        let (codec, n2) = read_varint(&bytes[n1..])?;
        let (multihash, _) = Multihash::decode(&bytes[n1 + n2..])?;
        Ok(Self::v1(
            codec_name(codec),
            multihash,
            StringEncoding::Base32Lower,
        ))
    }

    /// Encode to this CID's string form.
    pub fn encode(&self) -> String {
        match self.encoding {
            StringEncoding::Base58Btc => bs58::encode(self.to_bytes()).into_string(),
            StringEncoding::Base32Lower => {
                format!("b{}", BASE32_LOWER_NOPAD.encode(&self.to_bytes()).to_lowercase())
            }
        }
    }

    /// Decode a CID from its string form. The inverse of `encode()`.
    pub fn decode(s: &str) -> Result<Self, CidError> {
        if let Some(rest) = s.strip_prefix('b') {
            let bytes = BASE32_LOWER_NOPAD
                .decode(rest.to_uppercase().as_bytes())
                .map_err(|e| CidError::BaseDecodeFailed(e.to_string()))?;
            let mut cid = Self::from_bytes(&bytes)?;
            cid.encoding = StringEncoding::Base32Lower;
            return Ok(cid);
        }

        // No recognized multibase prefix: assume base58btc (CIDv0, or a
        // v1 CID that was encoded with `Base58Btc`).
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CidError::BaseDecodeFailed(e.to_string()))?;
        let mut cid = Self::from_bytes(&bytes)?;
        if cid.version == Version::V1 {
            cid.encoding = StringEncoding::Base58Btc;
        }
        Ok(cid)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Equality is defined by multihash bytes alone; this is a second,
/// narrower notion than full `Eq` (which also compares `content_type` and
/// `encoding`) used where only multihash identity matters, independent of
/// how the CID was encoded.
pub fn same_content(a: &Cid, b: &Cid) -> bool {
    a.multihash == b.multihash
}

fn codec_code(content_type: &str) -> u64 {
    match content_type {
        "raw" => 0x55,
        "dag-pb" => 0x70,
        "dag-cbor" => 0x71,
        _ => 0x55,
    }
}

fn codec_name(code: u64) -> String {
    match code {
        0x55 => "raw".to_string(),
        0x70 => "dag-pb".to_string(),
        0x71 => "dag-cbor".to_string(),
        other => format!("unknown-0x{other:x}"),
    }
}

fn write_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8]) -> Result<(u64, usize), CidError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(CidError::MalformedBytes);
        }
    }
    Err(CidError::MalformedBytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v0_round_trips_through_string() {
        let mh = Multihash::sha2_256(b"hello\n");
        let cid = Cid::v0(mh);
        let encoded = cid.encode();
        assert!(encoded.starts_with("Qm"));
        let decoded = Cid::decode(&encoded).unwrap();
        assert_eq!(decoded, cid);
    }

    #[test]
    fn v1_round_trips_through_string() {
        let mh = Multihash::sha2_256(b"some raw bytes");
        let cid = Cid::v1("raw", mh, StringEncoding::Base32Lower);
        let encoded = cid.encode();
        assert!(encoded.starts_with('b'));
        let decoded = Cid::decode(&encoded).unwrap();
        assert_eq!(decoded, cid);
    }

    #[test]
    fn equality_is_by_multihash() {
        let mh = Multihash::sha2_256(b"x");
        let a = Cid::v1("raw", mh.clone(), StringEncoding::Base32Lower);
        let b = Cid::v1("raw", mh, StringEncoding::Base58Btc);
        assert!(same_content(&a, &b));
    }

    #[test]
    fn for_content_picks_v0_for_dag_pb_sha256() {
        let mh = Multihash::sha2_256(b"node bytes");
        let cid = Cid::for_content("dag-pb", mh);
        assert_eq!(cid.version, Version::V0);
    }

    #[test]
    fn for_content_picks_v1_otherwise() {
        let mh = Multihash::sha2_256(b"raw leaf");
        let cid = Cid::for_content("raw", mh);
        assert_eq!(cid.version, Version::V1);
    }

    #[test]
    fn identity_hash_round_trips() {
        let mh = Multihash::identity(b"tiny");
        let cid = Cid::v1("raw", mh.clone(), StringEncoding::Base32Lower);
        assert!(cid.is_identity());
        let decoded = Cid::decode(&cid.encode()).unwrap();
        assert_eq!(decoded.multihash, mh);
    }

    #[test]
    fn varint_round_trips() {
        for value in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(value, &mut buf);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
pub mod proptest_support {
    use super::*;
    use proptest::prelude::*;

    /// A proptest `Strategy` generating arbitrary SHA2-256 CIDs.
    pub fn arb_cid() -> impl Strategy<Value = Cid> {
        proptest::collection::vec(any::<u8>(), 0..256).prop_map(|bytes| {
            Cid::for_content("raw", Multihash::sha2_256(&bytes))
        })
    }
}

#[cfg(test)]
mod proptests {
    use super::{proptest_support::arb_cid, Cid};
    use test_strategy::proptest;

    #[proptest]
    fn cid_string_round_trips(#[strategy(arb_cid())] cid: Cid) {
        let encoded = cid.encode();
        let decoded = Cid::decode(&encoded).unwrap();
        assert_eq!(decoded, cid);
        assert_eq!(decoded.encode(), encoded);
    }
}
