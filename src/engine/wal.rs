//! CINDER - Write-Ahead Log (WAL)
//! Logs every mutation before it is applied to the memtable, so that
//! unflushed writes survive a crash.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{Entry, ValueKind};

const HEADER_LEN: usize = 1 + 8 + 4;
const CRC_LEN: usize = 4;

/// Append-only log of committed entries.
///
/// ## Binary Format (per record, little endian)
/// ```text
/// [kind: 1][seq: 8][key_len: 4][key: N][val_len: 4][value: M][crc: 4]
/// ```
/// The CRC covers every byte before it. Deletions carry `val_len = 0`.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
}

impl WriteAheadLog {
    /// Open or create a log file for appending. A newly created log is
    /// durable only once the caller syncs its directory.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::from_open(e, &path.display().to_string()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(entry: &Entry) -> Vec<u8> {
        let value = entry.value.as_deref().unwrap_or_default();
        let mut buf = Vec::with_capacity(HEADER_LEN + entry.key.len() + 4 + value.len() + CRC_LEN);
        buf.push(entry.kind() as u8);
        buf.extend_from_slice(&entry.seq.to_le_bytes());
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Append one record. With `sync`, the data is on stable storage when
    /// this returns; otherwise it is only handed to the OS.
    pub fn append(&mut self, entry: &Entry, sync: bool) -> Result<()> {
        let encoded = Self::encode(entry);
        self.file.write_all(&encoded)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Force everything written so far to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Decode a single record at the start of `buf`.
    /// Returns `None` for a torn or corrupt record.
    fn decode(buf: &[u8]) -> Option<(Entry, usize)> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let kind = ValueKind::from_u8(buf[0])?;
        let seq = u64::from_le_bytes(buf[1..9].try_into().ok()?);
        let key_len = u32::from_le_bytes(buf[9..13].try_into().ok()?) as usize;

        let val_len_at = HEADER_LEN.checked_add(key_len)?;
        let val_at = val_len_at.checked_add(4)?;
        if buf.len() < val_at {
            return None;
        }
        let val_len = u32::from_le_bytes(buf[val_len_at..val_at].try_into().ok()?) as usize;
        let crc_at = val_at.checked_add(val_len)?;
        let end = crc_at.checked_add(CRC_LEN)?;
        if buf.len() < end {
            return None;
        }

        let stored = u32::from_le_bytes(buf[crc_at..end].try_into().ok()?);
        if crc32fast::hash(&buf[..crc_at]) != stored {
            return None;
        }

        let key = buf[HEADER_LEN..val_len_at].to_vec();
        let value = match kind {
            ValueKind::Value => Some(buf[val_at..crc_at].to_vec()),
            ValueKind::Deletion => None,
        };
        Some((Entry { key, seq, value }, end))
    }

    /// Replay every intact record of the log at `path`.
    ///
    /// A torn or corrupt tail is logged and cut off, unless `paranoid` is
    /// set, in which case it is reported as corruption.
    pub fn recover(path: &Path, paranoid: bool) -> Result<Vec<Entry>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            match Self::decode(&data[offset..]) {
                Some((entry, used)) => {
                    entries.push(entry);
                    offset += used;
                }
                None => break,
            }
        }

        if offset < data.len() {
            let dropped = data.len() - offset;
            if paranoid {
                return Err(Error::Corruption(format!(
                    "log {:?}: {} bytes unreadable at offset {}",
                    path, dropped, offset
                )));
            }
            log::warn!(
                "log {:?}: dropping {} corrupt trailing bytes at offset {}",
                path,
                dropped,
                offset
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], value: &[u8], seq: u64) -> Entry {
        Entry {
            key: key.to_vec(),
            seq,
            value: Some(value.to_vec()),
        }
    }

    #[test]
    fn test_append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.log");
        {
            let mut wal = WriteAheadLog::open(path.clone()).unwrap();
            wal.append(&put(b"a", b"1", 1), true).unwrap();
            wal.append(&put(b"b", b"2", 2), false).unwrap();
            wal.append(
                &Entry {
                    key: b"a".to_vec(),
                    seq: 3,
                    value: None,
                },
                false,
            )
            .unwrap();
        }

        let entries = WriteAheadLog::recover(&path, true).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], put(b"a", b"1", 1));
        assert_eq!(entries[1], put(b"b", b"2", 2));
        assert!(entries[2].is_tombstone());
        assert_eq!(entries[2].seq, 3);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let entries = WriteAheadLog::recover(&dir.path().join("nope.log"), true).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_torn_tail_truncated_unless_paranoid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.log");
        {
            let mut wal = WriteAheadLog::open(path.clone()).unwrap();
            wal.append(&put(b"k1", b"v1", 1), true).unwrap();
            wal.append(&put(b"k2", b"v2", 2), true).unwrap();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        assert!(matches!(
            WriteAheadLog::recover(&path, true),
            Err(Error::Corruption(_))
        ));

        let entries = WriteAheadLog::recover(&path, false).unwrap();
        assert_eq!(entries, vec![put(b"k1", b"v1", 1)]);
        // the torn record is gone, so the next replay is clean
        assert_eq!(WriteAheadLog::recover(&path, true).unwrap().len(), 1);
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.log");
        {
            let mut wal = WriteAheadLog::open(path.clone()).unwrap();
            wal.append(&put(b"key", b"value", 1), true).unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        data[HEADER_LEN + 1] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        assert!(WriteAheadLog::recover(&path, true).is_err());
        assert!(WriteAheadLog::recover(&path, false).unwrap().is_empty());
    }
}
