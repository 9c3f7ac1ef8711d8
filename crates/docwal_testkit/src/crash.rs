//! Crash recovery testing for docwal.
//!
//! A crash is simulated by copying the WAL directory of a running manager
//! and opening the copy with a fresh engine. The copy can additionally be
//! damaged the way an interrupted write or bad media would damage it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docwal_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let result = CrashRecoveryHarness::new(20).run(CrashPoint::TornTail);
//! assert!(result.passed, "{result:?}");
//! ```

use crate::fixtures::{test_config, TestWal};
use docwal_core::dir::{list_logfiles, shutdown_file};
use docwal_core::{CoreError, LogfileId, MemoryEngine, Tick, WalMarker};
use docwal_storage::{FileBackend, StorageBackend};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Damage applied to the copied directory before it is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Stop right after synced writes.
    AfterSyncedWrites,
    /// An interrupted marker write left a partial marker at the tail.
    TornTail,
    /// A byte inside the last marker flipped.
    CorruptLastMarker,
    /// Same as `CorruptLastMarker`, opened with `ignore_logfile_errors`.
    CorruptLastMarkerIgnored,
    /// The shutdown file is gone.
    MissingShutdownFile,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Documents expected after recovery.
    pub expected_documents: usize,
    /// Documents found in the index after recovery.
    pub recovered_documents: usize,
    /// Error returned by open, if any.
    pub error: Option<String>,
}

/// Copies the logfiles and the shutdown file of `source` into a new
/// temporary directory. The lock file is left behind.
///
/// # Errors
///
/// Returns an I/O error if a file cannot be copied.
pub fn snapshot_directory(source: &Path) -> io::Result<TempDir> {
    let target = TempDir::new()?;
    let logfiles = list_logfiles(source).map_err(|err| io::Error::other(err.to_string()))?;
    for (id, path) in logfiles {
        fs::copy(path, target.path().join(id.file_name()))?;
    }
    let shutdown = shutdown_file(source);
    if shutdown.exists() {
        fs::copy(&shutdown, shutdown_file(target.path()))?;
    }
    Ok(target)
}

/// Returns the newest logfile that holds any bytes.
pub fn newest_written_logfile(dir: &Path) -> Option<(LogfileId, PathBuf)> {
    list_logfiles(dir)
        .ok()?
        .into_iter()
        .rev()
        .find(|(_, path)| fs::metadata(path).is_ok_and(|m| m.len() > 0))
}

/// Appends the first `len` bytes of an encoded document marker to the
/// newest written logfile.
///
/// # Errors
///
/// Returns an error if no logfile was written or the append fails.
pub fn tear_tail(dir: &Path, len: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (_, path) = newest_written_logfile(dir).ok_or("no written logfile")?;
    let marker = WalMarker::Document {
        transaction_id: Default::default(),
        key: "torn".into(),
        revision: Default::default(),
        body: vec![0xEE; 64],
    }
    .encode(Tick::new(u64::MAX))?;

    let mut backend = FileBackend::open_existing(&path)?;
    backend.append(&marker[..len.min(marker.len() - 1)])?;
    backend.sync()?;
    Ok(())
}

/// Flips a byte `distance` bytes before the end of the newest written
/// logfile.
///
/// # Errors
///
/// Returns an error if no logfile was written or it is too short.
pub fn corrupt_tail(dir: &Path, distance: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (_, path) = newest_written_logfile(dir).ok_or("no written logfile")?;
    let mut data = fs::read(&path)?;
    let index = data
        .len()
        .checked_sub(distance)
        .ok_or("logfile shorter than the corruption distance")?;
    data[index] ^= 0xFF;
    fs::write(&path, data)?;
    Ok(())
}

/// Writes documents, snapshots the directory mid-flight and reopens the
/// snapshot.
pub struct CrashRecoveryHarness {
    documents: usize,
}

impl CrashRecoveryHarness {
    /// Creates a harness writing `documents` synced documents.
    pub fn new(documents: usize) -> Self {
        Self { documents }
    }

    /// Runs one crash scenario.
    pub fn run(&self, point: CrashPoint) -> CrashRecoveryResult {
        let wal = TestWal::new();
        for i in 0..self.documents {
            wal.write_document(&format!("doc-{i}"), b"{\"value\":1}");
        }
        let snapshot = snapshot_directory(wal.path()).expect("Failed to snapshot WAL");
        drop(wal);

        let mut config = test_config(snapshot.path());
        let expected = match point {
            CrashPoint::AfterSyncedWrites | CrashPoint::MissingShutdownFile => self.documents,
            CrashPoint::TornTail => {
                tear_tail(snapshot.path(), 30).expect("Failed to tear tail");
                self.documents
            }
            CrashPoint::CorruptLastMarker => {
                corrupt_tail(snapshot.path(), 8).expect("Failed to corrupt logfile");
                0
            }
            CrashPoint::CorruptLastMarkerIgnored => {
                corrupt_tail(snapshot.path(), 8).expect("Failed to corrupt logfile");
                config = config.ignore_logfile_errors(true);
                self.documents - 1
            }
        };
        if point == CrashPoint::MissingShutdownFile {
            fs::remove_file(shutdown_file(snapshot.path())).expect("Failed to remove shutdown file");
        }

        let description = format!("{point:?} after {} documents", self.documents);
        match TestWal::try_open_in(snapshot, Arc::new(MemoryEngine::new()), config) {
            Ok(recovered) => {
                let recovered_documents = recovered.document_count();
                CrashRecoveryResult {
                    passed: point != CrashPoint::CorruptLastMarker
                        && recovered_documents == expected,
                    description,
                    expected_documents: expected,
                    recovered_documents,
                    error: None,
                }
            }
            Err((err, _dir)) => CrashRecoveryResult {
                passed: point == CrashPoint::CorruptLastMarker
                    && matches!(err, CoreError::WalCorruption { .. }),
                description,
                expected_documents: expected,
                recovered_documents: 0,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_writes_survive_a_crash() {
        let result = CrashRecoveryHarness::new(20).run(CrashPoint::AfterSyncedWrites);
        assert!(result.passed, "{result:?}");
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let result = CrashRecoveryHarness::new(20).run(CrashPoint::TornTail);
        assert!(result.passed, "{result:?}");
    }

    #[test]
    fn corruption_fails_open() {
        let result = CrashRecoveryHarness::new(20).run(CrashPoint::CorruptLastMarker);
        assert!(result.passed, "{result:?}");
        assert!(result.error.is_some());
    }

    #[test]
    fn corruption_can_be_ignored() {
        let result = CrashRecoveryHarness::new(20).run(CrashPoint::CorruptLastMarkerIgnored);
        assert!(result.passed, "{result:?}");
    }

    #[test]
    fn missing_shutdown_file_replays_everything() {
        let result = CrashRecoveryHarness::new(5).run(CrashPoint::MissingShutdownFile);
        assert!(result.passed, "{result:?}");
    }

    #[test]
    fn snapshot_skips_lock_file() {
        let wal = TestWal::new();
        wal.write_document("a", b"1");
        let snapshot = snapshot_directory(wal.path()).unwrap();
        assert!(!snapshot.path().join("LOCK").exists());
        assert!(shutdown_file(snapshot.path()).exists());
        assert!(newest_written_logfile(snapshot.path()).is_some());
    }
}
