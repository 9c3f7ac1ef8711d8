//! Test fixtures and WAL helpers.
//!
//! Provides a logfile manager over a temporary directory together with an
//! in-memory storage engine that already knows one test collection.

use docwal_core::{
    CollectionId, DatabaseId, IndexEntry, LogfileManager, MemoryCollection, MemoryEngine,
    PhysicalCollection, RevisionId, SlotInfo, StorageEngine, TransactionId, WalConfig, WalMarker,
    WriteOptions, MIN_LOGFILE_SIZE,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Database of the test collection.
pub const TEST_DATABASE: DatabaseId = DatabaseId::new(1);

/// The collection every fixture creates.
pub const TEST_COLLECTION: CollectionId = CollectionId::new(10);

/// Upper bound for the polling helpers in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Small logfiles, one reserve file and a fast synchronizer.
pub fn test_config(directory: &Path) -> WalConfig {
    WalConfig::new(directory)
        .logfile_size(MIN_LOGFILE_SIZE)
        .reserve_logfiles(1)
        .sync_interval(Duration::from_millis(5))
        .flush_timeout(TEST_TIMEOUT)
}

/// A logfile manager over a temporary directory.
///
/// Shuts the manager down on drop.
pub struct TestWal {
    /// The logfile manager.
    pub manager: Arc<LogfileManager>,
    /// Engine receiving collected markers.
    pub engine: Arc<MemoryEngine>,
    config: WalConfig,
    revisions: AtomicU64,
    temp_dir: Option<TempDir>,
}

impl TestWal {
    /// Opens a WAL with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens a WAL with an adjusted [`test_config`].
    pub fn with_config(adjust: impl FnOnce(WalConfig) -> WalConfig) -> Self {
        Self::with_engine(Arc::new(MemoryEngine::new()), adjust)
    }

    /// Opens a WAL on `engine` with an adjusted [`test_config`].
    pub fn with_engine(
        engine: Arc<MemoryEngine>,
        adjust: impl FnOnce(WalConfig) -> WalConfig,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = adjust(test_config(temp_dir.path()));
        Self::open_in(temp_dir, engine, config)
    }

    /// Opens a WAL over an existing directory, e.g. a crash snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the WAL cannot be opened. Use [`TestWal::try_open_in`] to inspect
    /// the error.
    pub fn open_in(temp_dir: TempDir, engine: Arc<MemoryEngine>, config: WalConfig) -> Self {
        Self::try_open_in(temp_dir, engine, config).expect("Failed to open WAL")
    }

    /// Opens a WAL over an existing directory.
    ///
    /// # Errors
    ///
    /// Returns the open error together with the directory.
    pub fn try_open_in(
        temp_dir: TempDir,
        engine: Arc<MemoryEngine>,
        config: WalConfig,
    ) -> Result<Self, (docwal_core::CoreError, TempDir)> {
        engine.create_collection(TEST_DATABASE, TEST_COLLECTION);
        let config = WalConfig {
            directory: temp_dir.path().to_path_buf(),
            ..config
        };
        let shared: Arc<dyn StorageEngine> = Arc::clone(&engine) as Arc<dyn StorageEngine>;
        match LogfileManager::open(config.clone(), shared) {
            Ok(manager) => Ok(Self {
                revisions: AtomicU64::new(manager.current_tick().as_u64()),
                manager,
                engine,
                config,
                temp_dir: Some(temp_dir),
            }),
            Err(err) => Err((err, temp_dir)),
        }
    }

    /// Shuts down and reopens the same directory with the same engine.
    pub fn reopen(self) -> Self {
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let temp_dir = self.into_temp_dir();
        Self::open_in(temp_dir, engine, config)
    }

    /// Shuts the manager down and hands out the directory.
    pub fn into_temp_dir(mut self) -> TempDir {
        self.manager.shutdown().expect("Failed to shut down WAL");
        self.temp_dir.take().expect("Directory already handed out")
    }

    /// The WAL directory.
    pub fn path(&self) -> &Path {
        &self.config.directory
    }

    /// The configuration the manager was opened with.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// The test collection.
    pub fn collection(&self) -> Arc<MemoryCollection> {
        self.engine
            .memory_collection(TEST_DATABASE, TEST_COLLECTION)
            .expect("Test collection missing")
    }

    /// Number of keys in the test collection's index.
    pub fn document_count(&self) -> usize {
        self.collection().primary_index().len()
    }

    /// Looks up a key in the test collection's index.
    pub fn lookup(&self, key: &str) -> Option<IndexEntry> {
        self.collection().primary_index().lookup(key)
    }

    /// Next revision id for a write of this fixture.
    pub fn next_revision(&self) -> RevisionId {
        RevisionId::new(self.revisions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Writes a standalone document and points the index at it.
    pub fn write_document(&self, key: &str, body: &[u8]) -> SlotInfo {
        self.write_in_transaction(TransactionId::default(), key, body, true)
    }

    /// Writes a document owned by `transaction_id` and points the index at
    /// it.
    pub fn write_in_transaction(
        &self,
        transaction_id: TransactionId,
        key: &str,
        body: &[u8],
        wait_for_sync: bool,
    ) -> SlotInfo {
        let revision = self.next_revision();
        let marker = WalMarker::Document {
            transaction_id,
            key: key.to_string(),
            revision,
            body: body.to_vec(),
        };
        let info = self
            .manager
            .allocate_and_write(&marker, self.options().wait_for_sync(wait_for_sync))
            .expect("Failed to write document");
        self.collection().record_write(
            key,
            IndexEntry {
                revision,
                location: info.location(),
                size: info.size,
            },
        );
        info
    }

    /// Writes a remove marker and drops the key from the index.
    pub fn remove_document(&self, key: &str) -> SlotInfo {
        let marker = WalMarker::Remove {
            transaction_id: TransactionId::default(),
            key: key.to_string(),
            revision: self.next_revision(),
        };
        let info = self
            .manager
            .allocate_and_write(&marker, self.options().wait_for_sync(true))
            .expect("Failed to write remove marker");
        self.collection().record_remove(key);
        info
    }

    /// Seals the open logfile and waits until the collector processed it.
    pub fn flush_and_collect(&self) {
        self.manager
            .flush(true, true, false)
            .expect("Failed to flush WAL");
    }

    /// Write options for the test collection.
    pub fn options(&self) -> WriteOptions {
        WriteOptions::for_collection(TEST_DATABASE, TEST_COLLECTION)
    }
}

impl Default for TestWal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestWal {
    type Target = LogfileManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for TestWal {
    fn drop(&mut self) {
        // a second shutdown is a no-op
        let _ = self.manager.shutdown();
    }
}

/// Runs a test with a temporary WAL.
///
/// # Example
///
/// ```rust,ignore
/// use docwal_testkit::with_temp_wal;
///
/// #[test]
/// fn my_test() {
///     with_temp_wal(|wal| {
///         wal.write_document("k", b"v");
///     });
/// }
/// ```
pub fn with_temp_wal<F, R>(f: F) -> R
where
    F: FnOnce(&TestWal) -> R,
{
    let wal = TestWal::new();
    f(&wal)
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns the last result.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_writes_and_indexes() {
        with_temp_wal(|wal| {
            let info = wal.write_document("a", b"body");
            let entry = wal.lookup("a").expect("Key not indexed");
            assert_eq!(entry.location, info.location());
            assert_eq!(wal.document_count(), 1);
        });
    }

    #[test]
    fn revisions_increase() {
        let wal = TestWal::new();
        let first = wal.next_revision();
        let second = wal.next_revision();
        assert!(second > first);
    }

    #[test]
    fn reopen_keeps_directory() {
        let wal = TestWal::new();
        wal.write_document("a", b"body");
        let path = wal.path().to_path_buf();

        let wal = wal.reopen();
        assert_eq!(wal.path(), path);
        assert!(wal.lookup("a").is_some());
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(wait_until(Duration::from_millis(20), || true));
    }
}
