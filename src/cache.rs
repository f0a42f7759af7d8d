//! CINDER - Block Cache
//! LRU cache of decompressed table blocks with a fixed byte budget.
//!
//! A single `Arc<Cache>` may back any number of `Options` and open
//! databases. Each opened table takes its own namespace from `new_id` so
//! block keys never collide across tables or databases.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

/// Identity of a cached block: (table namespace, block offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub namespace: u64,
    pub offset: u64,
}

struct CacheEntry {
    block: Bytes,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<BlockKey, CacheEntry>,
    /// Recency order: smallest tick is least recently used.
    order: BTreeMap<u64, BlockKey>,
    usage: usize,
    tick: u64,
}

impl LruState {
    fn touch(&mut self, key: BlockKey) -> Option<Bytes> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(&key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key);
        Some(entry.block.clone())
    }

    fn remove(&mut self, key: &BlockKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                self.usage -= entry.block.len();
                true
            }
            None => false,
        }
    }
}

/// Bounded-capacity store of decompressed blocks.
///
/// ## Invariant
/// After every insert settles, `usage() <= capacity()`.
pub struct Cache {
    capacity: usize,
    state: Mutex<LruState>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    /// Create a cache holding at most `capacity` bytes of block data.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
            next_id: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh key namespace for one opened table.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a block, marking it most recently used.
    pub fn lookup(&self, key: &BlockKey) -> Option<Bytes> {
        let found = self.state.lock().touch(*key);
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert a block, evicting least-recently-used entries until it fits.
    ///
    /// Returns `false` without caching when the block alone exceeds the
    /// capacity; the caller keeps using its own copy.
    pub fn insert(&self, key: BlockKey, block: Bytes) -> bool {
        let charge = block.len();
        if charge > self.capacity {
            return false;
        }

        let mut state = self.state.lock();
        state.remove(&key);

        while state.usage + charge > self.capacity {
            let Some((&tick, &victim)) = state.order.iter().next() else {
                break;
            };
            state.order.remove(&tick);
            if let Some(entry) = state.entries.remove(&victim) {
                state.usage -= entry.block.len();
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        state.tick += 1;
        let tick = state.tick;
        state.order.insert(tick, key);
        state.entries.insert(key, CacheEntry { block, tick });
        state.usage += charge;
        true
    }

    /// Drop every block belonging to `namespace` (a closed or deleted table).
    pub fn erase_namespace(&self, namespace: u64) {
        let mut state = self.state.lock();
        let keys: Vec<BlockKey> = state
            .entries
            .keys()
            .filter(|k| k.namespace == namespace)
            .copied()
            .collect();
        for key in keys {
            state.remove(&key);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of block data currently resident.
    pub fn usage(&self) -> usize {
        self.state.lock().usage
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("capacity", &self.capacity)
            .field("usage", &self.usage())
            .finish()
    }
}
