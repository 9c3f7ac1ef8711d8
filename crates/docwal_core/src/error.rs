//! Error types for docwal core.

use crate::types::{CollectionId, DatabaseId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in docwal core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] docwal_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error for the shutdown file, config or admin bodies.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Writes are currently not allowed (recovery or shutdown in progress).
    #[error("WAL is read-only")]
    ReadOnly,

    /// A marker is bigger than the WAL accepts.
    #[error("document too large: {size} bytes exceeds maximum of {max} bytes")]
    DocumentTooLarge {
        /// Encoded size of the rejected marker.
        size: u64,
        /// Largest size currently accepted.
        max: u64,
    },

    /// No writable logfile became available in time.
    #[error("no writable logfile available after {waited:?}")]
    NoWritableLogfile {
        /// How long the writer waited for the allocator.
        waited: Duration,
    },

    /// A bounded wait or try-lock gave up.
    #[error("lock timeout while {operation} after {waited:?}")]
    LockTimeout {
        /// What the caller was waiting for.
        operation: String,
        /// How long it waited.
        waited: Duration,
    },

    /// A writer waited too long for write throttling to end.
    #[error("write throttling still active after {waited:?}")]
    WriteThrottleTimeout {
        /// How long the writer waited.
        waited: Duration,
    },

    /// Collection not found.
    #[error("collection not found: {collection} in database {database}")]
    CollectionNotFound {
        /// Database the collection was looked up in.
        database: DatabaseId,
        /// The missing collection.
        collection: CollectionId,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Configuration or property value out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected value.
        message: String,
    },

    /// The WAL directory is locked by another process.
    #[error("WAL directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// A background thread could not be started.
    #[error("could not start {name} thread: {source}")]
    ThreadStart {
        /// Thread name.
        name: String,
        /// Spawn failure.
        source: io::Error,
    },

    /// Internal invariant violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violation.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a lock timeout error.
    pub fn lock_timeout(operation: impl Into<String>, waited: Duration) -> Self {
        Self::LockTimeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Returns true if the device ran out of space.
    #[must_use]
    pub fn is_filesystem_full(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_filesystem_full(),
            Self::Io(err) => err.raw_os_error() == Some(28),
            _ => false,
        }
    }

    /// Returns true if the collection a marker belongs to is gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CollectionNotFound { .. })
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::WriteThrottleTimeout { .. }
                | Self::NoWritableLogfile { .. }
        ) || self.is_filesystem_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwal_storage::StorageError;

    #[test]
    fn filesystem_full_is_retryable() {
        let err = CoreError::from(StorageError::FilesystemFull { attempted: 10 });
        assert!(err.is_filesystem_full());
        assert!(err.is_retryable());
    }

    #[test]
    fn corruption_is_not_retryable() {
        let err = CoreError::wal_corruption("bad magic");
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_classification() {
        let err = CoreError::CollectionNotFound {
            database: DatabaseId::new(1),
            collection: CollectionId::new(2),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "collection not found: col:2 in database db:1");
    }
}
