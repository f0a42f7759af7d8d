//! CINDER - Table File Cache
//! Bounds the number of table file descriptors held open at once.
//!
//! Handles beyond the budget are closed least-recently-used first and
//! reopened on the next read. Readers hold an `Arc` to the handle they are
//! using, so closing one here never interrupts an in-flight read.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

type SharedFile = Arc<Mutex<File>>;

#[derive(Default)]
struct FileLru {
    files: HashMap<u64, (SharedFile, u64)>,
    order: BTreeMap<u64, u64>,
    tick: u64,
}

pub struct TableCache {
    capacity: usize,
    state: Mutex<FileLru>,
}

impl TableCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(FileLru::default()),
        }
    }

    fn handle(&self, number: u64, path: &Path) -> Result<SharedFile> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;

        if let Some((file, old_tick)) = state.files.get_mut(&number) {
            let file = Arc::clone(file);
            let old = std::mem::replace(old_tick, tick);
            state.order.remove(&old);
            state.order.insert(tick, number);
            return Ok(file);
        }

        let file = File::open(path).map_err(|e| Error::from_open(e, &path.display().to_string()))?;
        let file = Arc::new(Mutex::new(file));

        while state.files.len() >= self.capacity {
            let Some((&old, &victim)) = state.order.iter().next() else {
                break;
            };
            state.order.remove(&old);
            state.files.remove(&victim);
            log::debug!("table cache: closed table {:06}", victim);
        }

        state.files.insert(number, (Arc::clone(&file), tick));
        state.order.insert(tick, number);
        Ok(file)
    }

    /// Read exactly `len` bytes at `offset` of table `number`.
    pub fn read_at(&self, number: u64, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file = self.handle(number, path)?;
        let mut file = file.lock();
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Corruption(format!(
                "table {:06}: truncated read of {} bytes at {}",
                number, len, offset
            )),
            _ => Error::Io(e),
        })?;
        Ok(buf)
    }

    /// Close the handle for table `number`, if open.
    pub fn evict(&self, number: u64) {
        let mut state = self.state.lock();
        if let Some((_, tick)) = state.files.remove(&number) {
            state.order.remove(&tick);
        }
    }

    /// Number of descriptors currently held.
    pub fn open_files(&self) -> usize {
        self.state.lock().files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(2);
        for n in 0..5u64 {
            let path = dir.path().join(format!("{:06}.sst", n));
            std::fs::write(&path, format!("table-{}", n)).unwrap();
            let data = cache.read_at(n, &path, 0, 7).unwrap();
            assert_eq!(data, format!("table-{}", n).as_bytes());
            assert!(cache.open_files() <= 2);
        }

        // closed handles are reopened on demand
        let path = dir.path().join("000000.sst");
        assert_eq!(cache.read_at(0, &path, 6, 1).unwrap(), b"0");
    }

    #[test]
    fn test_short_read_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.sst");
        std::fs::write(&path, b"abc").unwrap();
        let cache = TableCache::new(4);
        assert!(matches!(
            cache.read_at(1, &path, 0, 10),
            Err(Error::Corruption(_))
        ));
        cache.evict(1);
        assert_eq!(cache.open_files(), 0);
    }
}
