//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A byte store held in memory.
///
/// Backs the datafiles of the in-memory reference engine and logfiles in
/// unit tests. A backend created with [`InMemoryBackend::with_limit`]
/// refuses appends that would grow it past the limit with
/// [`StorageError::FilesystemFull`] and stores nothing of the rejected
/// write, the way a full disk behaves after the owner truncates the partial
/// tail.
///
/// # Example
///
/// ```rust
/// use docwal_storage::{InMemoryBackend, StorageBackend};
///
/// let mut datafile = InMemoryBackend::with_limit(16);
/// assert_eq!(datafile.append(b"document").unwrap(), 0);
/// assert!(datafile.append(b"too large to fit").unwrap_err().is_filesystem_full());
/// assert_eq!(datafile.size().unwrap(), 8);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    limit: Option<u64>,
}

impl InMemoryBackend {
    /// Creates an empty backend without a size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that rejects appends growing it past `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            limit: Some(limit),
        }
    }

    /// Returns the size limit, if any.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        // offset + len fits in the buffer, so both fit in usize
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let data = self.data.get_mut();
        let offset = data.len() as u64;
        if let Some(limit) = self.limit {
            if offset + new_data.len() as u64 > limit {
                return Err(StorageError::FilesystemFull {
                    attempted: new_data.len(),
                });
            }
        }
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let data = self.data.get_mut();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_empty_without_limit() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.limit(), None);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn appends_and_reads_markers() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"header").unwrap(), 0);
        assert_eq!(backend.append(b"doc").unwrap(), 6);
        assert_eq!(backend.append(b"").unwrap(), 9);

        assert_eq!(backend.read_at(6, 3).unwrap(), b"doc");
        assert_eq!(backend.read_all().unwrap(), b"headerdoc");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn limit_reports_filesystem_full_and_keeps_data() {
        let mut backend = InMemoryBackend::with_limit(8);
        backend.append(b"12345").unwrap();

        let err = backend.append(b"6789").unwrap_err();
        assert!(err.is_filesystem_full());
        assert_eq!(backend.size().unwrap(), 5);

        backend.append(b"678").unwrap();
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn truncate_rolls_back_appends() {
        let mut backend = InMemoryBackend::with_limit(10);
        backend.append(b"keep").unwrap();
        backend.append(b"undo").unwrap();

        backend.truncate(4).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"keep");
        backend.append(b"again!").unwrap();
        assert_eq!(backend.size().unwrap(), 10);
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd {
                requested: 100,
                size: 5
            })
        ));
    }

    proptest! {
        #[test]
        fn offsets_match_concatenation(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(backend.read_all().unwrap(), expected);
        }
    }
}
