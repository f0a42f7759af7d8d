//! CINDER - Table Blocks
//! Prefix-compressed sorted blocks with restart points.
//!
//! On-disk layout of a block:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Entry 0: [shared][non_shared][value_len][key delta][value]      │
//! │ Entry 1: ...   (varint32 lengths, key shares a prefix with prev) │
//! │ Entry N: ...                                                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Restart array: [off_0 (4B)][off_1 (4B)]...                      │
//! │ Num restarts (4B)                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `restart_interval` entries the full key is stored (`shared = 0`)
//! and its offset recorded, so a seek can binary search the restart array
//! and then scan at most one interval.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::types::compare_internal_keys;

pub fn put_varint32(buf: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode a varint32, returning `(value, bytes_consumed)`.
pub fn get_varint32(data: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    for (i, &byte) in data.iter().take(5).enumerate() {
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Accumulates sorted entries and serializes them into a block.
/// Entries MUST be added in increasing internal-key order.
pub struct BlockBuilder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval: restart_interval.max(1),
            last_key: Vec::new(),
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;
        if self.counter < self.restart_interval {
            shared = self
                .last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count();
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buf, shared as u32);
        put_varint32(&mut self.buf, non_shared as u32);
        put_varint32(&mut self.buf, value.len() as u32);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
    }

    /// Size of the block if finished now.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Append the restart array and return the block contents.
    pub fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            self.buf.extend_from_slice(&restart.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buf
    }
}

/// An immutable, decoded-on-demand block.
#[derive(Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short".into()));
        }
        let num_restarts = u32::from_le_bytes(
            data[data.len() - 4..]
                .try_into()
                .map_err(|_| Error::Corruption("bad restart count".into()))?,
        ) as usize;
        let restarts_len = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .filter(|&n| n <= data.len() && num_restarts > 0)
            .ok_or_else(|| Error::Corruption("bad restart array".into()))?;
        Ok(Self {
            restart_offset: data.len() - restarts_len,
            num_restarts,
            data,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self) -> BlockIter {
        BlockIter {
            block: self.clone(),
            current: 0,
            next: self.restart_offset,
            key: Vec::new(),
            value: (0, 0),
            valid: false,
        }
    }

    fn restart_point(&self, index: usize) -> usize {
        let at = self.restart_offset + index * 4;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[at..at + 4]);
        u32::from_le_bytes(raw) as usize
    }

    /// Decode the entry header at `offset`:
    /// `(shared, non_shared, value_len, header_len)`.
    fn entry_header(&self, offset: usize) -> Result<(usize, usize, usize, usize)> {
        let limit = &self.data[offset.min(self.restart_offset)..self.restart_offset];
        let corrupt = || Error::Corruption(format!("bad block entry at offset {}", offset));
        let (shared, a) = get_varint32(limit).ok_or_else(corrupt)?;
        let (non_shared, b) = get_varint32(&limit[a..]).ok_or_else(corrupt)?;
        let (value_len, c) = get_varint32(&limit[a + b..]).ok_or_else(corrupt)?;
        let header = a + b + c;
        if header + non_shared as usize + value_len as usize > limit.len() {
            return Err(corrupt());
        }
        Ok((shared as usize, non_shared as usize, value_len as usize, header))
    }
}

/// Cursor over a block's entries.
pub struct BlockIter {
    block: Block,
    current: usize,
    next: usize,
    key: Vec<u8>,
    value: (usize, usize),
    valid: bool,
}

impl BlockIter {
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value.0..self.value.1]
    }

    fn seek_to_restart(&mut self, index: usize) {
        self.key.clear();
        self.next = self.block.restart_point(index);
        self.valid = false;
    }

    fn parse_next(&mut self) -> Result<()> {
        if self.next >= self.block.restart_offset {
            self.valid = false;
            return Ok(());
        }
        let offset = self.next;
        let (shared, non_shared, value_len, header) = match self.block.entry_header(offset) {
            Ok(h) => h,
            Err(e) => {
                self.valid = false;
                return Err(e);
            }
        };
        if shared > self.key.len() {
            self.valid = false;
            return Err(Error::Corruption(format!(
                "block entry at {} shares more than the previous key",
                offset
            )));
        }
        let key_at = offset + header;
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[key_at..key_at + non_shared]);
        let value_at = key_at + non_shared;
        self.value = (value_at, value_at + value_len);
        self.current = offset;
        self.next = value_at + value_len;
        self.valid = true;
        Ok(())
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart(0);
        self.parse_next()
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        self.parse_next()
    }

    /// Position at the first entry whose internal key is >= `target`.
    pub fn seek(&mut self, target: &[u8], cmp: &dyn Comparator) -> Result<()> {
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let offset = self.block.restart_point(mid);
            let (shared, non_shared, _, header) = self.block.entry_header(offset)?;
            if shared != 0 {
                return Err(Error::Corruption("restart entry shares a prefix".into()));
            }
            let key = &self.block.data[offset + header..offset + header + non_shared];
            if compare_internal_keys(cmp, key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left);
        loop {
            self.parse_next()?;
            if !self.valid || compare_internal_keys(cmp, &self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
    }
}
