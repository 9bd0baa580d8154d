//! Order-preserving position identifiers.
//!
//! A position identifier is a byte string whose lexicographic order
//! matches document order, letting two nodes be structurally compared
//! without touching the tree. Within a record page, identifiers are
//! serialized ascending by byte length and delta-encoded against their
//! predecessor's shared prefix; the first is written in full.

use smallvec::SmallVec;

use crate::bytes::{put_varint, ByteReader};
use crate::error::Result;

/// An order-preserving position identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PosId(SmallVec<[u8; 16]>);

impl PosId {
    /// Builds an identifier from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    /// Identifier of the first node below the document root.
    pub fn root() -> Self {
        Self(SmallVec::from_slice(&[1]))
    }

    /// Raw bytes of the identifier.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derives the identifier of the `ordinal`-th child (1-based).
    ///
    /// The ordinal is appended as a length byte (0x81 upward) followed
    /// by its big-endian bytes with leading zeros stripped. Larger
    /// ordinals need more bytes and a larger length byte, so the
    /// lexicographic order of encoded identifiers follows the numeric
    /// order of ordinals at every level.
    pub fn child(&self, ordinal: u64) -> Self {
        let mut bytes = Vec::from(self.0.as_slice());
        let be = ordinal.to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count().min(7);
        bytes.push(0x80 + (8 - skip) as u8);
        bytes.extend_from_slice(&be[skip..]);
        Self(SmallVec::from_vec(bytes))
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Encodes `id` against its predecessor. The first identifier of a run
/// (`prev == None`) is written absolute: varint length plus raw bytes.
/// Followers store the shared-prefix length and the remaining suffix.
pub fn encode(out: &mut Vec<u8>, prev: Option<&PosId>, id: &PosId) {
    match prev {
        None => {
            put_varint(out, id.bytes().len() as u64);
            out.extend_from_slice(id.bytes());
        }
        Some(prev) => {
            let shared = shared_prefix_len(prev.bytes(), id.bytes());
            let suffix = &id.bytes()[shared..];
            put_varint(out, shared as u64);
            put_varint(out, suffix.len() as u64);
            out.extend_from_slice(suffix);
        }
    }
}

/// Decodes one identifier, inverting [`encode`].
pub fn decode(reader: &mut ByteReader<'_>, prev: Option<&PosId>) -> Result<PosId> {
    match prev {
        None => {
            let len = reader.get_varint()? as usize;
            Ok(PosId::from_bytes(reader.get_bytes(len)?))
        }
        Some(prev) => {
            let shared = reader.get_varint()? as usize;
            let suffix_len = reader.get_varint()? as usize;
            let suffix = reader.get_bytes(suffix_len)?;
            let mut bytes = Vec::with_capacity(shared + suffix_len);
            bytes.extend_from_slice(&prev.bytes()[..shared.min(prev.bytes().len())]);
            bytes.extend_from_slice(suffix);
            Ok(PosId::from_bytes(&bytes))
        }
    }
}
