//! WAL directory management.
//!
//! ```text
//! <wal directory>/
//! ├─ LOCK                 # Advisory lock for a single logfile manager
//! ├─ SHUTDOWN             # Tick/collection state of the last clean stop
//! ├─ logfile-<id>.db      # Logfiles, one per tick-derived id
//! └─ ...
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::LogfileId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const SHUTDOWN_FILE: &str = "SHUTDOWN";
const SHUTDOWN_TEMP: &str = "SHUTDOWN.tmp";

/// Holds the exclusive lock on a WAL directory and knows its file layout.
///
/// Only one `WalDirectory` can exist per directory at a time, across
/// processes and within one process.
#[derive(Debug)]
pub struct WalDirectory {
    path: PathBuf,
    _lock_file: File,
}

impl WalDirectory {
    /// Opens (creating it if needed) and locks a WAL directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another manager holds the
    /// lock, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "WAL path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the WAL directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a logfile.
    #[must_use]
    pub fn logfile_path(&self, id: LogfileId) -> PathBuf {
        self.path.join(id.file_name())
    }

    /// Returns the path of the shutdown file.
    #[must_use]
    pub fn shutdown_path(&self) -> PathBuf {
        shutdown_file(&self.path)
    }

    /// Lists the logfiles of the directory in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_logfiles(&self) -> CoreResult<Vec<(LogfileId, PathBuf)>> {
        list_logfiles(&self.path)
    }

    /// Replaces the shutdown file with `data`.
    ///
    /// Writes a temporary file, syncs it, renames it over the old file and
    /// syncs the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn write_shutdown_file(&self, data: &[u8]) -> CoreResult<()> {
        let temp_path = self.path.join(SHUTDOWN_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.shutdown_path())?;
        self.sync_directory()
    }

    /// Deletes a logfile and syncs the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove_logfile(&self, id: LogfileId) -> CoreResult<()> {
        let path = self.logfile_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(logfile = %id, "logfile already gone");
            }
            Err(err) => return Err(err.into()),
        }
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Returns the shutdown file path of the WAL directory at `path`.
#[must_use]
pub fn shutdown_file(path: &Path) -> PathBuf {
    path.join(SHUTDOWN_FILE)
}

/// Lists the logfiles below `path` in id order without taking the lock.
///
/// Used by offline tools that inspect a directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_logfiles(path: &Path) -> CoreResult<Vec<(LogfileId, PathBuf)>> {
    let mut logfiles = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(LogfileId::from_file_name) {
            logfiles.push((id, entry.path()));
        }
    }
    logfiles.sort_by_key(|(id, _)| *id);
    Ok(logfiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let wal_path = temp.path().join("journal");

        let dir = WalDirectory::open(&wal_path).unwrap();
        assert!(wal_path.is_dir());
        assert_eq!(dir.path(), wal_path);
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();

        let _dir1 = WalDirectory::open(temp.path()).unwrap();
        let result = WalDirectory::open(temp.path());
        assert!(matches!(result, Err(CoreError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _dir = WalDirectory::open(temp.path()).unwrap();
        }
        let _dir2 = WalDirectory::open(temp.path()).unwrap();
    }

    #[test]
    fn lists_logfiles_in_id_order() {
        let temp = tempdir().unwrap();
        let dir = WalDirectory::open(temp.path()).unwrap();

        for id in [30u64, 4, 100] {
            File::create(dir.logfile_path(LogfileId::new(id))).unwrap();
        }
        File::create(temp.path().join("notes.txt")).unwrap();

        let ids: Vec<u64> = dir
            .list_logfiles()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id.as_u64())
            .collect();
        assert_eq!(ids, vec![4, 30, 100]);
    }

    #[test]
    fn shutdown_file_is_replaced() {
        let temp = tempdir().unwrap();
        let dir = WalDirectory::open(temp.path()).unwrap();

        dir.write_shutdown_file(b"first").unwrap();
        dir.write_shutdown_file(b"second").unwrap();

        assert_eq!(fs::read(dir.shutdown_path()).unwrap(), b"second");
        assert!(!temp.path().join(SHUTDOWN_TEMP).exists());
    }

    #[test]
    fn remove_missing_logfile_is_ok() {
        let temp = tempdir().unwrap();
        let dir = WalDirectory::open(temp.path()).unwrap();
        dir.remove_logfile(LogfileId::new(9)).unwrap();
    }
}
