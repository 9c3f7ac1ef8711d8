//! Logfile backend on top of a regular file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
}

/// A logfile stored in one regular file.
///
/// The length is cached and only changes through [`StorageBackend::append`]
/// and [`StorageBackend::truncate`], so it always equals the number of bytes
/// the owner handed over. Reads and writes share one lock because both move
/// the file cursor.
///
/// Files opened with [`FileBackend::open_read_only`] reject every mutation
/// with [`StorageError::ReadOnly`]; inspection tools use them on directories
/// a running manager may still own.
///
/// # Example
///
/// ```no_run
/// use docwal_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// # fn main() -> docwal_storage::StorageResult<()> {
/// let mut logfile = FileBackend::open(Path::new("logfile-42.db"))?;
/// let offset = logfile.append(b"marker bytes")?;
/// logfile.sync()?;
/// assert_eq!(logfile.read_at(offset, 6)?, b"marker");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
    read_only: bool,
}

impl FileBackend {
    /// Opens the file at `path` for appending, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for appending. Recovery uses this so a missing
    /// logfile is an error instead of a new empty file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, len }),
            read_only,
        })
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file was opened with [`FileBackend::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn writable(&self) -> StorageResult<()> {
        if self.read_only {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; len];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.writable()?;
        let inner = self.inner.get_mut();
        let offset = inner.len;
        if data.is_empty() {
            return Ok(offset);
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        inner
            .file
            .write_all(data)
            .map_err(|err| StorageError::from_write(err, data.len()))?;
        inner.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.writable()?;
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.writable()?;
        let inner = self.inner.get_mut();
        if new_size > inner.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: inner.len,
            });
        }

        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_logfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
        assert!(path.exists());
        assert!(!backend.is_read_only());
    }

    #[test]
    fn appends_return_consecutive_offsets() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("logfile-2.db")).unwrap();

        assert_eq!(backend.append(b"header").unwrap(), 0);
        assert_eq!(backend.append(b"marker").unwrap(), 6);
        assert_eq!(backend.append(b"").unwrap(), 12);
        assert_eq!(backend.read_at(6, 6).unwrap(), b"marker");
        assert!(backend.read_at(10, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("logfile-3.db")).unwrap();
        backend.append(b"short").unwrap();

        assert!(matches!(
            backend.read_at(3, 5),
            Err(StorageError::ReadPastEnd { size: 5, .. })
        ));
    }

    #[test]
    fn synced_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-4.db");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.flush().unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"durable");
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-5.db");
        assert!(FileBackend::open_existing(&path).is_err());
        assert!(FileBackend::open_read_only(&path).is_err());
    }

    #[test]
    fn truncate_cuts_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-6.db");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"completetorn").unwrap();

        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
        assert_eq!(backend.append(b"next").unwrap(), 8);
        assert_eq!(backend.read_all().unwrap(), b"completenext");
    }

    #[test]
    fn truncate_cannot_grow() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("logfile-7.db")).unwrap();
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncateBeyondEnd {
                requested: 10,
                size: 3
            })
        ));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-8.db");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"sealed").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(backend.is_read_only());
        assert_eq!(backend.read_all().unwrap(), b"sealed");
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.sync(), Err(StorageError::ReadOnly)));
        backend.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
    }
}
