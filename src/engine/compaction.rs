//! CINDER - Compaction
//! Merges every live table into one once too many accumulate, dropping
//! versions no reader can observe any more.
//!
//! ## Version retention
//! Readers are the latest state plus every live snapshot. For each user
//! key, a version survives if it is what some reader would see: the newest
//! version, and the newest version at or below each snapshot. A tombstone
//! left as the oldest survivor of its key shadows nothing and is dropped.

use std::cmp::Ordering;

use super::iterator::MergingIterator;
use crate::comparator::Comparator;
use crate::error::Result;
use crate::types::{Entry, SequenceNumber};

/// Live table count that triggers a full merge after a flush.
pub const COMPACTION_TRIGGER: usize = 8;

pub fn needs_compaction(table_count: usize) -> bool {
    table_count >= COMPACTION_TRIGGER
}

/// Filter the versions of one user key (newest first) down to those some
/// reader can still see. `snapshots` must be sorted ascending.
pub fn select_versions(versions: Vec<Entry>, snapshots: &[SequenceNumber]) -> Vec<Entry> {
    let mut kept: Vec<Entry> = Vec::with_capacity(versions.len().min(snapshots.len() + 1));
    let mut newer_seq: Option<SequenceNumber> = None;

    for version in versions {
        let visible = match newer_seq {
            // the newest version is what the latest state shows
            None => true,
            // some snapshot s with version.seq <= s < newer_seq
            Some(newer) => {
                let idx = snapshots.partition_point(|&s| s < version.seq);
                snapshots.get(idx).is_some_and(|&s| s < newer)
            }
        };
        newer_seq = Some(version.seq);
        if visible {
            kept.push(version);
        }
    }

    while kept.last().is_some_and(|e| e.is_tombstone()) {
        kept.pop();
    }
    kept
}

/// Stream every surviving version from `merger`, in internal order, to `emit`.
/// Returns the number of versions dropped.
pub fn compact<F>(
    merger: &mut MergingIterator,
    cmp: &dyn Comparator,
    snapshots: &[SequenceNumber],
    mut emit: F,
) -> Result<usize>
where
    F: FnMut(&Entry) -> Result<()>,
{
    let mut dropped = 0;
    let mut group: Vec<Entry> = Vec::new();
    let mut flush = |group: &mut Vec<Entry>, dropped: &mut usize| -> Result<()> {
        let total = group.len();
        let kept = select_versions(std::mem::take(group), snapshots);
        *dropped += total - kept.len();
        for entry in &kept {
            emit(entry)?;
        }
        Ok(())
    };

    merger.seek_to_first()?;
    while let Some(entry) = merger.current() {
        let same_key = group
            .first()
            .is_some_and(|first| cmp.compare(&first.key, &entry.key) == Ordering::Equal);
        if !same_key && !group.is_empty() {
            flush(&mut group, &mut dropped)?;
        }
        group.push(entry.clone());
        merger.advance()?;
    }
    if !group.is_empty() {
        flush(&mut group, &mut dropped)?;
    }
    Ok(dropped)
}
