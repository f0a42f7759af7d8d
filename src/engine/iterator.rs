//! CINDER - Iterators
//! Merges the memtable and every table into a single ordered view of the
//! database as of one sequence number.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use super::Db;
use crate::comparator::Comparator;
use crate::error::Result;
use crate::types::{compare_versions, Entry, Key, SequenceNumber, Value};

/// A sorted stream of versioned entries (newest version of a key first).
pub trait EntrySource: Send {
    fn seek_to_first(&mut self) -> Result<()>;

    /// Position at the first entry whose user key is >= `user_key`.
    fn seek(&mut self, user_key: &[u8]) -> Result<()>;

    fn current(&self) -> Option<&Entry>;

    fn advance(&mut self) -> Result<()>;
}

/// In-memory source over a sorted vector of entries.
pub struct VecSource {
    entries: Vec<Entry>,
    cmp: Arc<dyn Comparator>,
    pos: usize,
}

impl VecSource {
    pub fn new(entries: Vec<Entry>, cmp: Arc<dyn Comparator>) -> Self {
        let pos = entries.len();
        Self { entries, cmp, pos }
    }
}

impl EntrySource for VecSource {
    fn seek_to_first(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        self.pos = self
            .entries
            .partition_point(|e| self.cmp.compare(&e.key, user_key) == Ordering::Less);
        Ok(())
    }

    fn current(&self) -> Option<&Entry> {
        self.entries.get(self.pos)
    }

    fn advance(&mut self) -> Result<()> {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }
}

/// K-way merge of sources in internal-key order.
pub struct MergingIterator {
    sources: Vec<Box<dyn EntrySource>>,
    cmp: Arc<dyn Comparator>,
    current: Option<usize>,
}

impl MergingIterator {
    pub fn new(sources: Vec<Box<dyn EntrySource>>, cmp: Arc<dyn Comparator>) -> Self {
        Self {
            sources,
            cmp,
            current: None,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<(usize, &Entry)> = None;
        for (i, source) in self.sources.iter().enumerate() {
            let Some(entry) = source.current() else {
                continue;
            };
            let better = match smallest {
                None => true,
                Some((_, best)) => {
                    compare_versions(
                        self.cmp.as_ref(),
                        &entry.key,
                        entry.seq,
                        &best.key,
                        best.seq,
                    ) == Ordering::Less
                }
            };
            if better {
                smallest = Some((i, entry));
            }
        }
        self.current = smallest.map(|(i, _)| i);
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.seek_to_first()?;
        }
        self.find_smallest();
        Ok(())
    }

    pub fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            source.seek(user_key)?;
        }
        self.find_smallest();
        Ok(())
    }

    pub fn current(&self) -> Option<&Entry> {
        self.current.and_then(|i| self.sources[i].current())
    }

    pub fn advance(&mut self) -> Result<()> {
        if let Some(i) = self.current {
            self.sources[i].advance()?;
            self.find_smallest();
        }
        Ok(())
    }
}

/// Lazy, ordered cursor over live keys of a `Db`.
///
/// Sees the database as of its creation (or as of the snapshot in the
/// `ReadOptions` it was created with) for its whole lifetime. Cannot
/// outlive the `Db` it borrows.
///
/// ## Example
/// ```no_run
/// use cinder::{Db, Options, ReadOptions};
///
/// let db = Db::open("/tmp/cinder-doc", &Options::new().with_create_if_missing(true)).unwrap();
/// let mut iter = db.iter(&ReadOptions::new()).unwrap();
/// iter.seek(b"user:").unwrap();
/// while iter.valid() && iter.key().starts_with(b"user:") {
///     println!("{:?}", iter.value());
///     iter.advance().unwrap();
/// }
/// ```
pub struct DbIterator<'a> {
    merger: MergingIterator,
    cmp: Arc<dyn Comparator>,
    seq: SequenceNumber,
    current: Option<(Key, Value)>,
    positioned: bool,
    _db: PhantomData<&'a Db>,
}

impl<'a> DbIterator<'a> {
    pub(crate) fn new(
        merger: MergingIterator,
        cmp: Arc<dyn Comparator>,
        seq: SequenceNumber,
    ) -> Self {
        Self {
            merger,
            cmp,
            seq,
            current: None,
            positioned: false,
            _db: PhantomData,
        }
    }

    /// Move the merger to the next live user entry, skipping versions that
    /// are newer than the read sequence, shadowed, or deleted.
    fn find_next_user_entry(&mut self, mut skip: Option<Key>) -> Result<()> {
        self.current = None;
        while let Some(entry) = self.merger.current() {
            let hidden = entry.seq > self.seq
                || skip
                    .as_ref()
                    .is_some_and(|s| self.cmp.compare(s, &entry.key) == Ordering::Equal);
            if !hidden {
                match &entry.value {
                    Some(value) => {
                        self.current = Some((entry.key.clone(), value.clone()));
                        return Ok(());
                    }
                    None => skip = Some(entry.key.clone()),
                }
            }
            self.merger.advance()?;
        }
        Ok(())
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.positioned = true;
        self.merger.seek_to_first()?;
        self.find_next_user_entry(None)
    }

    /// Position at the first key >= `key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.positioned = true;
        self.merger.seek(key)?;
        self.find_next_user_entry(None)
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Current key. Panics if `!valid()`.
    pub fn key(&self) -> &[u8] {
        match &self.current {
            Some((key, _)) => key,
            None => panic!("DbIterator::key called on an invalid iterator"),
        }
    }

    /// Current value. Panics if `!valid()`.
    pub fn value(&self) -> &[u8] {
        match &self.current {
            Some((_, value)) => value,
            None => panic!("DbIterator::value called on an invalid iterator"),
        }
    }

    /// Step to the next key.
    pub fn advance(&mut self) -> Result<()> {
        let Some((key, _)) = self.current.take() else {
            return Ok(());
        };
        self.merger.advance()?;
        self.find_next_user_entry(Some(key))
    }
}

impl Iterator for DbIterator<'_> {
    type Item = Result<(Key, Value)>;

    /// Yields from the current position; starts at the first key if the
    /// iterator was never positioned.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.positioned {
            if let Err(e) = self.seek_to_first() {
                return Some(Err(e));
            }
        }
        let item = self.current.clone()?;
        if let Err(e) = self.advance() {
            self.current = None;
            return Some(Err(e));
        }
        Some(Ok(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn entry(key: &str, seq: u64, value: Option<&str>) -> Entry {
        Entry {
            key: key.as_bytes().to_vec(),
            seq,
            value: value.map(|v| v.as_bytes().to_vec()),
        }
    }

    fn iterator(sources: Vec<Vec<Entry>>, seq: SequenceNumber) -> DbIterator<'static> {
        let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let sources = sources
            .into_iter()
            .map(|s| Box::new(VecSource::new(s, Arc::clone(&cmp))) as Box<dyn EntrySource>)
            .collect();
        DbIterator::new(MergingIterator::new(sources, Arc::clone(&cmp)), cmp, seq)
    }

    fn collect(iter: DbIterator<'_>) -> Vec<(String, String)> {
        iter.map(|r| {
            let (k, v) = r.unwrap();
            (
                String::from_utf8(k).unwrap(),
                String::from_utf8(v).unwrap(),
            )
        })
        .collect()
    }

    #[test]
    fn test_merge_prefers_newest_version() {
        let older = vec![entry("a", 1, Some("a1")), entry("b", 2, Some("b1"))];
        let newer = vec![entry("a", 5, Some("a2")), entry("c", 6, Some("c1"))];
        let got = collect(iterator(vec![older, newer], 100));
        assert_eq!(
            got,
            vec![
                ("a".into(), "a2".into()),
                ("b".into(), "b1".into()),
                ("c".into(), "c1".into()),
            ]
        );
    }

    #[test]
    fn test_tombstones_hide_older_versions() {
        let older = vec![entry("a", 1, Some("a1")), entry("b", 2, Some("b1"))];
        let newer = vec![entry("a", 3, None)];
        let got = collect(iterator(vec![older, newer], 100));
        assert_eq!(got, vec![("b".into(), "b1".into())]);
    }

    #[test]
    fn test_read_sequence_hides_later_writes() {
        let versions = vec![
            entry("a", 4, Some("new")),
            entry("a", 2, Some("old")),
            entry("b", 5, Some("late")),
        ];
        let got = collect(iterator(vec![versions], 3));
        assert_eq!(got, vec![("a".into(), "old".into())]);
    }

    #[test]
    fn test_seek_and_step() {
        let data = vec![
            entry("apple", 1, Some("1")),
            entry("banana", 2, Some("2")),
            entry("cherry", 3, Some("3")),
        ];
        let mut iter = iterator(vec![data], 10);
        iter.seek(b"b").unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");
        iter.advance().unwrap();
        assert_eq!(iter.value(), b"3");
        iter.advance().unwrap();
        assert!(!iter.valid());

        iter.seek(b"zebra").unwrap();
        assert!(!iter.valid());
        iter.seek_to_first().unwrap();
        assert_eq!(iter.key(), b"apple");
    }
}
