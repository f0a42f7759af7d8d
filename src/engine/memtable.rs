//! CINDER - MemTable (In-Memory Sorted Map)
//! The write buffer of the LSM-Tree. All writes land here first and are
//! flushed to a table once `write_buffer_size` is reached.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::types::{compare_versions, Entry, Key, SequenceNumber, Value};

/// Per-entry bookkeeping overhead counted towards the memtable size.
const ENTRY_OVERHEAD: usize = 16;

/// Versioned key ordered by the database comparator, newest version first.
struct MemKey {
    user_key: Key,
    seq: SequenceNumber,
    cmp: Arc<dyn Comparator>,
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(
            self.cmp.as_ref(),
            &self.user_key,
            self.seq,
            &other.user_key,
            other.seq,
        )
    }
}

/// In-memory multi-version store backed by a BTreeMap.
/// A `None` value represents a tombstone (deletion marker).
pub struct MemTable {
    entries: BTreeMap<MemKey, Option<Value>>,
    cmp: Arc<dyn Comparator>,
    size_bytes: usize,
}

impl MemTable {
    pub fn new(cmp: Arc<dyn Comparator>) -> Self {
        Self {
            entries: BTreeMap::new(),
            cmp,
            size_bytes: 0,
        }
    }

    /// Approximate memory footprint in bytes.
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    /// Number of versions held (including tombstones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a new version. Sequence numbers are unique per database, so
    /// this never overwrites an existing version.
    pub fn add(&mut self, entry: Entry) {
        self.size_bytes +=
            entry.key.len() + entry.value.as_ref().map_or(0, |v| v.len()) + ENTRY_OVERHEAD;
        let key = MemKey {
            user_key: entry.key,
            seq: entry.seq,
            cmp: Arc::clone(&self.cmp),
        };
        self.entries.insert(key, entry.value);
    }

    fn probe(&self, key: &[u8], seq: SequenceNumber) -> MemKey {
        MemKey {
            user_key: key.to_vec(),
            seq,
            cmp: Arc::clone(&self.cmp),
        }
    }

    /// Newest version of `key` visible at `seq`.
    ///
    /// - `None`: the memtable knows nothing about the key
    /// - `Some(None)`: the key was deleted
    /// - `Some(Some(v))`: the key maps to `v`
    pub fn get(&self, key: &[u8], seq: SequenceNumber) -> Option<Option<Value>> {
        let probe = self.probe(key, seq);
        let (found, value) = self.entries.range(probe..).next()?;
        if self.cmp.compare(&found.user_key, key) == Ordering::Equal {
            Some(value.clone())
        } else {
            None
        }
    }

    /// Newest version of every key visible at `seq`, tombstones included,
    /// in comparator order.
    pub fn visible_entries(&self, seq: SequenceNumber) -> Vec<Entry> {
        let mut out: Vec<Entry> = Vec::new();
        for (key, value) in &self.entries {
            if key.seq > seq {
                continue;
            }
            if let Some(last) = out.last() {
                if self.cmp.compare(&last.key, &key.user_key) == Ordering::Equal {
                    continue;
                }
            }
            out.push(Entry {
                key: key.user_key.clone(),
                seq: key.seq,
                value: value.clone(),
            });
        }
        out
    }

    /// Every version in internal order, for flushing to a table.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.iter().map(|(key, value)| Entry {
            key: key.user_key.clone(),
            seq: key.seq,
            value: value.clone(),
        })
    }
}
