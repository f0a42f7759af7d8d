//! CINDER - Snapshots
//! Point-in-time read views pinned by sequence number.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Live snapshot sequence numbers of one database, with reference counts.
#[derive(Default)]
pub struct SnapshotList {
    live: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot at `seq` and return its handle.
    pub(crate) fn acquire(self: &Arc<Self>, seq: SequenceNumber) -> Snapshot {
        *self.live.lock().entry(seq).or_insert(0) += 1;
        Snapshot {
            seq,
            owner: Arc::clone(self),
        }
    }

    fn release(&self, seq: SequenceNumber) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                live.remove(&seq);
            }
        }
    }

    /// Sequence numbers some live snapshot can observe, ascending.
    pub fn sequences(&self) -> Vec<SequenceNumber> {
        self.live.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.live.lock().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

/// Immutable marker of committed state at creation time.
///
/// Created by `Db::snapshot`. Released by `Db::release_snapshot` or when
/// dropped. Attach it to reads with `ReadOptions::with_snapshot`.
pub struct Snapshot {
    seq: SequenceNumber,
    owner: Arc<SnapshotList>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.seq
    }

    /// True if this snapshot was created by the database owning `list`.
    pub(crate) fn belongs_to(&self, list: &Arc<SnapshotList>) -> bool {
        Arc::ptr_eq(&self.owner, list)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.owner.release(self.seq);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}
