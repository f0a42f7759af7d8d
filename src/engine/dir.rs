//! CINDER - Database Directory
//! Exclusive ownership of a database directory and durable directory
//! entries.
//!
//! A `LOCK` file in the directory carries an exclusive advisory lock for as
//! long as a `Db` holds it. The lock is per open file, so a second handle in
//! the same process is refused just like another process.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "LOCK";

/// Held lock on a database directory. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Lock `dir`, failing with `Error::Resource` if another handle holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::from_open(e, &path.display().to_string()))?;

        if let Err(e) = file.try_lock_exclusive() {
            return Err(Error::Resource(format!(
                "database at {:?} is in use by another handle: {}",
                dir, e
            )));
        }

        // truncate only once locked, the holder's pid must survive a refused open
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to unlock {:?}: {}", self.path, e);
        }
    }
}

/// Make the directory entries of `dir` (created, renamed or removed files)
/// durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directories cannot be opened for syncing here; entries are durable with
/// their files.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
