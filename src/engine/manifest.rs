//! CINDER - Manifest
//! Persistent database descriptor: identity of the comparator and filter
//! policy, live tables, and file/sequence counters.
//!
//! ## Binary Format
//! ```text
//! [crc: 4 bytes (LE)][len: 4 bytes (LE)][bincode payload: len bytes]
//! ```
//! The file is replaced atomically (write `MANIFEST.tmp`, fsync, rename),
//! then the directory is synced so the rename survives a crash.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::dir::sync_dir;
use super::table::TableMeta;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::types::SequenceNumber;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

pub fn log_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub comparator: String,
    pub filter_policy: Option<String>,
    pub next_file_number: u64,
    /// Number of the log holding writes not yet in any table.
    pub log_number: u64,
    pub last_sequence: SequenceNumber,
    /// Live tables, oldest first.
    pub tables: Vec<TableMeta>,
}

impl Manifest {
    /// Descriptor of a brand-new database created with `options`.
    pub fn new(options: &Options) -> Self {
        Self {
            comparator: options.comparator.name().to_string(),
            filter_policy: options.filter_policy.as_ref().map(|p| p.name().to_string()),
            next_file_number: 2,
            log_number: 1,
            last_sequence: 0,
            tables: Vec::new(),
        }
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    pub fn allocate_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Reject options whose comparator or filter policy differ from the
    /// ones this database was created with.
    pub fn check_identity(&self, options: &Options) -> Result<()> {
        let comparator = options.comparator.name();
        if self.comparator != comparator {
            return Err(Error::IdentityMismatch {
                kind: "comparator",
                stored: self.comparator.clone(),
                supplied: comparator.to_string(),
            });
        }

        let filter = options.filter_policy.as_ref().map(|p| p.name());
        if self.filter_policy.as_deref() != filter {
            return Err(Error::IdentityMismatch {
                kind: "filter policy",
                stored: self.filter_policy.clone().unwrap_or_else(|| "<none>".into()),
                supplied: filter.unwrap_or("<none>").to_string(),
            });
        }
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let data = fs::read(dir.join(MANIFEST_FILE))?;
        if data.len() < 8 {
            return Err(Error::Corruption("manifest too short".into()));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&data[0..4]);
        let crc = u32::from_le_bytes(word);
        word.copy_from_slice(&data[4..8]);
        let len = u32::from_le_bytes(word) as usize;

        let payload = data
            .get(8..8 + len)
            .ok_or_else(|| Error::Corruption("manifest truncated".into()))?;
        if crc32fast::hash(payload) != crc {
            return Err(Error::Corruption("manifest checksum mismatch".into()));
        }
        bincode::deserialize(payload)
            .map_err(|e| Error::Corruption(format!("manifest undecodable: {}", e)))
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }
}
