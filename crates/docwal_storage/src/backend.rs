//! The byte-store trait behind logfiles and datafiles.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store backing one logfile or one datafile.
///
/// Backends know nothing about markers. docwal_core frames, checksums and
/// interprets every byte; a backend only stores them in order and makes
/// them durable on request.
///
/// # Contract
///
/// - `append` writes at the current end and returns that offset
/// - `read_at` returns the bytes an earlier `append` stored at that offset
/// - after `sync` returns, every appended byte survives a process crash
/// - `truncate` only shrinks, and is how torn tails and failed transfers
///   are rolled back
///
/// Backends are `Send + Sync` so one logfile can be shared between writer,
/// synchronizer and collector threads.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range ends beyond the
    /// stored bytes, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at. Empty appends
    /// return the current size.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FilesystemFull`] when the device has no
    /// space left, or another error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Number of stored bytes, which is also the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TruncateBeyondEnd`] if `new_size` exceeds the
    /// current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads every stored byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| StorageError::ReadPastEnd {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }
}
