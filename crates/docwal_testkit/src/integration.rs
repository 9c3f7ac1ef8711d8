//! Cross-module integration test helpers.
//!
//! Provides a harness that mirrors writes in a model and checks the
//! collected index against it, plus scenarios covering the collector,
//! transactions, throttling, retention and restarts.

use crate::fixtures::{wait_until, TestWal, TEST_TIMEOUT};
use crate::generators::WriteOp;
use docwal_core::{LocationKind, LogfileId, PhysicalCollection, WalMarker};
use std::collections::HashMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The WAL under test.
    pub wal: TestWal,
    /// Live documents and their bodies.
    documents: HashMap<String, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a harness over a fresh [`TestWal`].
    pub fn new() -> Self {
        Self::with_wal(TestWal::new())
    }

    /// Creates a harness over `wal`.
    pub fn with_wal(wal: TestWal) -> Self {
        Self {
            wal,
            documents: HashMap::new(),
        }
    }

    /// Writes a document and tracks it.
    pub fn put(&mut self, key: &str, body: &[u8]) {
        self.wal.write_document(key, body);
        self.documents.insert(key.to_string(), body.to_vec());
    }

    /// Removes a document and updates tracking.
    pub fn remove(&mut self, key: &str) {
        self.wal.remove_document(key);
        self.documents.remove(key);
    }

    /// Applies a generated workload step.
    pub fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Put { key, body } => self.put(key, body),
            WriteOp::Remove { key } => self.remove(key),
        }
    }

    /// Seals the open logfile and waits for the collector.
    pub fn collect(&self) {
        self.wal.flush_and_collect();
    }

    /// Verifies that every tracked document is indexed in the datafile with
    /// its latest body, and nothing else is indexed.
    pub fn verify_collected(&self) {
        let collection = self.wal.collection();
        assert_eq!(
            collection.primary_index().len(),
            self.documents.len(),
            "Index size differs from tracked documents"
        );

        for (key, expected) in &self.documents {
            let entry = collection
                .primary_index()
                .lookup(key)
                .unwrap_or_else(|| panic!("Key {key:?} missing from index"));
            assert_eq!(
                entry.location.kind,
                LocationKind::Datafile(collection.datafile_id()),
                "Key {key:?} was not moved to the datafile"
            );

            let (_, marker) = collection
                .read_marker(entry.location)
                .expect("Failed to read datafile marker");
            match marker {
                WalMarker::Document {
                    key: found,
                    revision,
                    body,
                    ..
                } => {
                    assert_eq!(&found, key);
                    assert_eq!(revision, entry.revision);
                    assert_eq!(&body, expected, "Body mismatch for {key:?}");
                }
                other => panic!("Unexpected marker {other:?} for {key:?}"),
            }
        }
    }

    /// Returns the count of tracked documents.
    pub fn tracked_count(&self) -> usize {
        self.documents.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Collector scenarios.
pub mod collection {
    use super::*;

    /// Writes one key twice; only the later write ends up alive in the
    /// datafile and the earlier one is counted dead.
    pub fn test_overwrite_keeps_latest(wal: &TestWal) {
        let first = wal.write_document("k", b"first");
        wal.write_document("k", b"second");
        let revision = wal.lookup("k").expect("Key not indexed").revision;

        wal.flush_and_collect();

        let collection = wal.collection();
        let datafile = collection.datafile_id();
        let entry = wal.lookup("k").expect("Key lost by the collector");
        assert_eq!(entry.revision, revision);
        assert_eq!(entry.location.kind, LocationKind::Datafile(datafile));
        let stats = collection.datafile_statistics()[&datafile];
        assert_eq!(stats.alive_count, 1);
        assert_eq!(stats.dead_count, 1);
        assert_eq!(stats.dead_bytes, u64::from(first.size));
    }

    /// A datafile that refuses writes leaves the logfile sealed; the
    /// collector keeps retrying.
    pub fn test_filesystem_full_retries(wal: &TestWal) {
        for i in 0..4 {
            wal.write_document(&format!("k{i}"), &[0xAA; 128]);
        }
        wal.manager
            .flush(true, false, false)
            .expect("Failed to flush WAL");

        let stats = wal.manager.stats();
        assert!(wait_until(TEST_TIMEOUT, || stats.collector_errors() >= 2));
        assert_eq!(wal.manager.ids().last_collected, LogfileId::default());
        let entry = wal.lookup("k0").expect("Key not indexed");
        assert!(entry.location.is_wal());
    }
}

/// Transaction scenarios.
pub mod transaction {
    use super::*;
    use docwal_core::TransactionId;

    /// Markers of a failed transaction are skipped by the collector and the
    /// transaction is forgotten once its logfile is collected.
    pub fn test_failed_transaction_is_skipped(wal: &TestWal) {
        let id = TransactionId::new(77);
        wal.manager.register_transaction(id, false);
        wal.write_document("committed", b"yes");
        wal.write_in_transaction(id, "doomed", b"no", true);
        wal.manager.unregister_transaction(id, true);
        assert!(wal.manager.failed_transactions().contains(&id));

        wal.flush_and_collect();

        let committed = wal.lookup("committed").expect("Committed key lost");
        assert!(!committed.location.is_wal());
        let doomed = wal.lookup("doomed").expect("Index entry vanished");
        assert!(doomed.location.is_wal());
        assert!(wait_until(TEST_TIMEOUT, || wal
            .manager
            .failed_transactions()
            .is_empty()));
    }
}

/// Throttling scenarios.
pub mod throttling {
    use super::*;
    use docwal_core::CoreError;

    /// A blocked collection keeps operations pending, which throttles
    /// writers until the collector drains the queue.
    pub fn test_backlog_throttles_writes(wal: &TestWal) {
        wal.manager.set_throttle_when_pending(1);
        wal.write_document("a", b"1");
        wal.write_document("b", b"2");

        let collection = wal.collection();
        let guard = collection.locks().write.lock();
        wal.manager
            .flush(true, false, false)
            .expect("Failed to flush WAL");
        assert!(wait_until(TEST_TIMEOUT, || wal.manager.is_throttled()));

        let marker = WalMarker::Document {
            transaction_id: Default::default(),
            key: "c".into(),
            revision: wal.next_revision(),
            body: b"3".to_vec(),
        };
        let err = wal
            .manager
            .allocate_and_write(&marker, wal.options())
            .expect_err("Write should be throttled");
        assert!(matches!(err, CoreError::WriteThrottleTimeout { .. }));

        drop(guard);
        wal.manager
            .wait_for_collector_queue(collection.id(), TEST_TIMEOUT)
            .expect("Collector queue did not drain");
        assert!(wait_until(TEST_TIMEOUT, || !wal.manager.is_throttled()));
        wal.write_document("c", b"3");
    }
}

/// Retention scenarios.
pub mod retention {
    use super::*;
    use docwal_core::Tick;
    use std::time::Duration;

    /// A barrier keeps a collected logfile alive until it is removed.
    pub fn test_barrier_blocks_removal(wal: &TestWal) {
        let barrier = wal
            .manager
            .add_logfile_barrier(Tick::new(1), Duration::from_secs(600));
        let logfile = wal.write_document("a", b"1").logfile_id;
        wal.flush_and_collect();

        assert!(!wait_until(Duration::from_millis(300), || wal
            .manager
            .logfile(logfile)
            .is_none()));

        assert!(wal.manager.remove_logfile_barrier(barrier));
        assert!(wait_until(TEST_TIMEOUT, || wal
            .manager
            .logfile(logfile)
            .is_none()));
        let path = wal.path().join(logfile.file_name());
        assert!(wait_until(TEST_TIMEOUT, || !path.exists()));
    }
}

/// Restart scenarios.
pub mod restart {
    use super::*;
    use docwal_core::MarkerIterator;

    /// After a restart the logfile holding a tick is found by its recovered
    /// tick range.
    pub fn test_tick_range_after_restart(wal: TestWal) -> TestWal {
        let info = wal.write_document("a", b"payload");
        let wal = wal.reopen();

        let range = wal.manager.logfiles_for_tick_range(info.tick, info.tick);
        assert!(range.min_tick_included);
        assert_eq!(range.logfiles.len(), 1);
        assert_eq!(range.logfiles[0].id(), info.logfile_id);

        let data = range.logfiles[0].read_all().expect("Failed to read logfile");
        let found = MarkerIterator::new(&data)
            .map(|decoded| decoded.expect("Corrupt logfile"))
            .find(|decoded| decoded.tick == info.tick)
            .expect("Tick not found in logfile");
        assert!(matches!(found.marker, WalMarker::Document { ref key, .. } if key == "a"));

        wal.manager.return_logfiles(&range.logfiles);
        wal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::workload_strategy;
    use docwal_core::admin;
    use docwal_core::MemoryEngine;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn harness_tracks_documents() {
        let mut harness = IntegrationHarness::new();
        harness.put("a", b"1");
        harness.put("b", b"2");
        harness.remove("a");
        harness.put("b", b"3");
        assert_eq!(harness.tracked_count(), 1);

        harness.collect();
        harness.verify_collected();
    }

    #[test]
    fn overwrite_keeps_latest() {
        collection::test_overwrite_keeps_latest(&TestWal::new());
    }

    #[test]
    fn filesystem_full_retries() {
        let engine = Arc::new(MemoryEngine::with_datafile_limit(64));
        let wal = TestWal::with_engine(engine, |config| config);
        collection::test_filesystem_full_retries(&wal);
    }

    #[test]
    fn failed_transaction_is_skipped() {
        transaction::test_failed_transaction_is_skipped(&TestWal::new());
    }

    #[test]
    fn backlog_throttles_writes() {
        let wal = TestWal::with_config(|config| {
            config.throttle_wait(std::time::Duration::from_millis(50))
        });
        throttling::test_backlog_throttles_writes(&wal);
    }

    #[test]
    fn barrier_blocks_removal() {
        let wal = TestWal::with_config(|config| config.historic_logfiles(0));
        retention::test_barrier_blocks_removal(&wal);
    }

    #[test]
    fn tick_range_after_restart() {
        let wal = restart::test_tick_range_after_restart(TestWal::new());
        assert!(wal.lookup("a").is_some());
    }

    #[test]
    fn flush_on_empty_wal() {
        let wal = TestWal::new();
        wal.manager
            .flush(true, true, false)
            .expect("Empty flush failed");
        admin::put_flush(&wal.manager, b"").expect("Empty admin flush failed");
    }

    #[test]
    fn properties_through_admin() {
        let wal = TestWal::new();
        let properties = admin::put_properties(&wal.manager, br#"{"logfileSize": 1048576}"#)
            .expect("Failed to update properties");
        assert_eq!(properties.logfile_size, 1_048_576);
        assert_eq!(admin::get_properties(&wal.manager).logfile_size, 1_048_576);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn collected_index_matches_model(ops in workload_strategy(48)) {
            let mut harness = IntegrationHarness::new();
            for op in &ops {
                harness.apply(op);
            }
            harness.collect();
            harness.verify_collected();
        }
    }
}
