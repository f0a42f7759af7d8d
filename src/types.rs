//! CINDER - Core Type Definitions
//! Fundamental types shared by the options layer and the engine.

use std::cmp::Ordering;

use crate::comparator::Comparator;

/// Key type for the storage engine.
/// Using Vec<u8> allows arbitrary binary keys.
pub type Key = Vec<u8>;

/// Value type for the storage engine.
pub type Value = Vec<u8>;

/// Monotonic commit counter. Every write gets the next number.
pub type SequenceNumber = u64;

/// Largest sequence number representable in an internal key trailer.
pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Kind of a versioned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
}

impl ValueKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueKind::Deletion),
            1 => Some(ValueKind::Value),
            _ => None,
        }
    }
}

/// A single versioned entry.
/// A `None` value indicates a tombstone (deletion marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub seq: SequenceNumber,
    pub value: Option<Value>,
}

impl Entry {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn kind(&self) -> ValueKind {
        if self.value.is_some() {
            ValueKind::Value
        } else {
            ValueKind::Deletion
        }
    }
}

/// Encode `user_key ++ (seq << 8 | kind)` as stored in table blocks.
pub fn encode_internal_key(user_key: &[u8], seq: SequenceNumber, kind: ValueKind) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + 8);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&((seq << 8) | kind as u64).to_le_bytes());
    buf
}

/// Split an internal key into `(user_key, seq, kind)`.
pub fn decode_internal_key(ikey: &[u8]) -> Option<(&[u8], SequenceNumber, ValueKind)> {
    if ikey.len() < 8 {
        return None;
    }
    let (user_key, trailer) = ikey.split_at(ikey.len() - 8);
    let packed = u64::from_le_bytes(trailer.try_into().ok()?);
    let kind = ValueKind::from_u8((packed & 0xff) as u8)?;
    Some((user_key, packed >> 8, kind))
}

/// Internal ordering: user key ascending under `cmp`, then sequence descending,
/// so the newest version of a key sorts first.
pub fn compare_versions(
    cmp: &dyn Comparator,
    a_key: &[u8],
    a_seq: SequenceNumber,
    b_key: &[u8],
    b_seq: SequenceNumber,
) -> Ordering {
    cmp.compare(a_key, b_key).then_with(|| b_seq.cmp(&a_seq))
}

/// Compare two encoded internal keys. Malformed keys sort by raw bytes.
pub fn compare_internal_keys(cmp: &dyn Comparator, a: &[u8], b: &[u8]) -> Ordering {
    match (decode_internal_key(a), decode_internal_key(b)) {
        (Some((ak, aseq, _)), Some((bk, bseq, _))) => compare_versions(cmp, ak, aseq, bk, bseq),
        _ => a.cmp(b),
    }
}
