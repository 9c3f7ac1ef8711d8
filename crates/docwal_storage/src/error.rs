//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// `ENOSPC` on every platform docwal targets.
const ENOSPC: i32 = 28;

/// Errors raised by logfile and datafile backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// The device holding the store has no space left.
    #[error("filesystem full while writing {attempted} bytes")]
    FilesystemFull {
        /// Number of bytes the failed write tried to store.
        attempted: usize,
    },

    /// A read reached past the last stored byte.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A truncation asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// The store was opened for inspection only.
    #[error("storage opened read-only")]
    ReadOnly,
}

impl StorageError {
    /// Classifies an I/O error raised while writing `attempted` bytes.
    pub fn from_write(err: io::Error, attempted: usize) -> Self {
        if err.raw_os_error() == Some(ENOSPC) {
            Self::FilesystemFull { attempted }
        } else {
            Self::Io(err)
        }
    }

    /// Returns true if the error means the device ran out of space.
    #[must_use]
    pub fn is_filesystem_full(&self) -> bool {
        match self {
            Self::FilesystemFull { .. } => true,
            Self::Io(err) => err.raw_os_error() == Some(ENOSPC),
            _ => false,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enospc_is_filesystem_full() {
        let err = StorageError::from_write(io::Error::from_raw_os_error(ENOSPC), 64);
        assert!(matches!(err, StorageError::FilesystemFull { attempted: 64 }));
        assert!(err.is_filesystem_full());

        let raw = StorageError::Io(io::Error::from_raw_os_error(ENOSPC));
        assert!(raw.is_filesystem_full());
    }

    #[test]
    fn other_errors_stay_io() {
        let err = StorageError::from_write(io::Error::new(io::ErrorKind::Other, "boom"), 8);
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!err.is_filesystem_full());
        assert!(!StorageError::ReadOnly.is_filesystem_full());
    }
}
