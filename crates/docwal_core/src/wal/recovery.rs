//! Startup inspection and replay of existing logfiles.
//!
//! Logfiles already collected according to the shutdown file are only
//! probed for their tick range. All others are scanned: a torn tail is cut
//! off, transaction outcomes and dropped collections are recorded, and a
//! second pass replays the markers of non-failed transactions into the
//! storage engine.

use crate::collector::scan::scanned_marker;
use crate::config::WalConfig;
use crate::dir::WalDirectory;
use crate::engine::StorageEngine;
use crate::error::{CoreError, CoreResult};
use crate::marker::{decode_marker_at, MarkerIterator, WalMarker};
use crate::types::{CollectionId, DatabaseId, LogfileId, Tick, TickClock, TransactionId};
use crate::wal::inventory::LogfileIds;
use crate::wal::logfile::{Logfile, LogfileStatus, FOOTER_SIZE, HEADER_SIZE};
use crate::wal::shutdown::ShutdownInfo;
use docwal_storage::FileBackend;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What recovery found.
#[derive(Debug, Default)]
pub(crate) struct RecoveryOutcome {
    pub(crate) logfiles: Vec<Arc<Logfile>>,
    pub(crate) ids: LogfileIds,
    pub(crate) failed_transactions: HashSet<TransactionId>,
    pub(crate) dropped_collections: HashSet<(DatabaseId, CollectionId)>,
    pub(crate) dropped_databases: HashSet<DatabaseId>,
    pub(crate) replayed: u64,
}

#[derive(Debug, Default)]
struct TransactionScan {
    open: HashSet<TransactionId>,
    failed: HashSet<TransactionId>,
}

impl TransactionScan {
    fn observe(&mut self, marker: &WalMarker) {
        match marker {
            WalMarker::BeginTransaction { transaction_id, .. } => {
                self.open.insert(*transaction_id);
            }
            WalMarker::CommitTransaction { transaction_id, .. } => {
                self.open.remove(transaction_id);
            }
            WalMarker::AbortTransaction { transaction_id, .. } => {
                self.open.remove(transaction_id);
                self.failed.insert(*transaction_id);
            }
            _ => {}
        }
    }

    /// Transactions never committed count as failed.
    fn finish(mut self) -> HashSet<TransactionId> {
        self.failed.extend(self.open.drain());
        self.failed
    }
}

pub(crate) struct Recovery<'a> {
    config: &'a WalConfig,
    directory: &'a WalDirectory,
    clock: &'a TickClock,
    engine: &'a dyn StorageEngine,
    shutdown: ShutdownInfo,
}

impl<'a> Recovery<'a> {
    pub(crate) fn new(
        config: &'a WalConfig,
        directory: &'a WalDirectory,
        clock: &'a TickClock,
        engine: &'a dyn StorageEngine,
        shutdown: Option<ShutdownInfo>,
    ) -> Self {
        Self {
            config,
            directory,
            clock,
            engine,
            shutdown: shutdown.unwrap_or_default(),
        }
    }

    pub(crate) fn run(self) -> CoreResult<RecoveryOutcome> {
        self.clock.update(self.shutdown.tick);
        let mut outcome = RecoveryOutcome {
            ids: LogfileIds {
                last_opened: LogfileId::default(),
                last_sealed: self.shutdown.last_sealed,
                last_collected: self.shutdown.last_collected,
            },
            ..RecoveryOutcome::default()
        };
        let mut transactions = TransactionScan::default();
        let mut to_replay = Vec::new();

        for (id, path) in self.directory.list_logfiles()? {
            // logfile ids come from the tick clock
            self.clock.update(Tick::new(id.as_u64()));

            let backend = FileBackend::open_existing(&path)?;
            let logfile = Arc::new(Logfile::open_existing(
                id,
                &path,
                self.config.logfile_size,
                Box::new(backend),
            )?);

            if logfile.committed_bytes() == 0 {
                trace!(logfile = %id, "found empty logfile");
                outcome.logfiles.push(logfile);
                continue;
            }

            if id <= outcome.ids.last_collected {
                self.probe_collected(&logfile)?;
                logfile.set_status(LogfileStatus::Collected);
            } else {
                match self.inspect(&logfile, &mut transactions, &mut outcome) {
                    Ok(()) => to_replay.push(Arc::clone(&logfile)),
                    Err(err) if self.config.ignore_logfile_errors => {
                        warn!(logfile = %id, error = %err, "ignoring unreadable logfile");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            self.clock.update(logfile.tick_max());
            outcome.ids.last_opened = outcome.ids.last_opened.max(id);
            debug!(
                logfile = %id,
                status = %logfile.status(),
                tick_min = %logfile.tick_min(),
                tick_max = %logfile.tick_max(),
                "inspected logfile"
            );
            outcome.logfiles.push(logfile);
        }

        outcome.failed_transactions = transactions.finish();

        if !to_replay.is_empty() {
            info!(logfiles = to_replay.len(), "running WAL recovery");
            for logfile in &to_replay {
                outcome.replayed += self.replay(logfile, &outcome.failed_transactions)?;
            }
            info!(
                markers = outcome.replayed,
                failed_transactions = outcome.failed_transactions.len(),
                "WAL recovery finished"
            );
        }

        for logfile in &to_replay {
            if logfile.status() == LogfileStatus::Open {
                self.seal_leftover(logfile)?;
            }
            outcome.ids.last_sealed = outcome.ids.last_sealed.max(logfile.id());
        }
        outcome.ids.last_sealed = outcome.ids.last_sealed.max(outcome.ids.last_collected);
        Ok(outcome)
    }

    /// Reads the tick range of a collected logfile from its header and
    /// footer, falling back to a full scan.
    fn probe_collected(&self, logfile: &Logfile) -> CoreResult<()> {
        let size = logfile.committed_bytes();
        if size >= HEADER_SIZE + FOOTER_SIZE {
            let header = logfile.read_range(0, HEADER_SIZE as usize)?;
            let footer = logfile.read_range(size - FOOTER_SIZE, FOOTER_SIZE as usize)?;
            if let (Ok(Some(first)), Ok(Some(last))) =
                (decode_marker_at(&header, 0), decode_marker_at(&footer, 0))
            {
                if last.marker == WalMarker::Footer {
                    logfile.set_tick_range(first.tick, last.tick);
                    return Ok(());
                }
            }
        }

        trace!(logfile = %logfile.id(), "no footer, scanning collected logfile");
        let data = logfile.read_all()?;
        let mut min = Tick::ZERO;
        let mut max = Tick::ZERO;
        for decoded in MarkerIterator::new(&data) {
            let Ok(decoded) = decoded else {
                break;
            };
            if min == Tick::ZERO {
                min = decoded.tick;
            }
            max = max.max(decoded.tick);
        }
        logfile.set_tick_range(min, max);
        Ok(())
    }

    fn inspect(
        &self,
        logfile: &Logfile,
        transactions: &mut TransactionScan,
        outcome: &mut RecoveryOutcome,
    ) -> CoreResult<()> {
        let data = logfile.read_all()?;
        let mut iter = MarkerIterator::new(&data);
        let mut min = Tick::ZERO;
        let mut max = Tick::ZERO;
        let mut sealed = false;

        for decoded in iter.by_ref() {
            let decoded = match decoded {
                Ok(decoded) => decoded,
                Err(err) if self.config.ignore_logfile_errors => {
                    warn!(logfile = %logfile.id(), error = %err, "corrupt marker, ignoring rest of logfile");
                    break;
                }
                Err(err) => {
                    return Err(CoreError::wal_corruption(format!(
                        "logfile {}: {err}",
                        logfile.id()
                    )))
                }
            };
            if min == Tick::ZERO {
                min = decoded.tick;
            }
            max = max.max(decoded.tick);
            sealed = decoded.marker == WalMarker::Footer;

            transactions.observe(&decoded.marker);
            match decoded.marker {
                WalMarker::DropCollection {
                    database_id,
                    collection_id,
                } => {
                    outcome.dropped_collections.insert((database_id, collection_id));
                }
                WalMarker::DropDatabase { database_id } => {
                    outcome.dropped_databases.insert(database_id);
                }
                _ => {}
            }
        }

        let valid = iter.valid_len();
        if valid < data.len() as u64 {
            warn!(
                logfile = %logfile.id(),
                valid_bytes = valid,
                file_bytes = data.len(),
                "truncating torn logfile tail"
            );
            logfile.truncate(valid)?;
            sealed = false;
        }

        logfile.set_tick_range(min, max);
        logfile.set_status(if sealed {
            LogfileStatus::Sealed
        } else {
            LogfileStatus::Open
        });
        Ok(())
    }

    fn replay(&self, logfile: &Logfile, failed: &HashSet<TransactionId>) -> CoreResult<u64> {
        let data = logfile.read_all()?;
        let mut context = None;
        let mut replayed = 0;
        for decoded in MarkerIterator::new(&data) {
            let Ok(decoded) = decoded else {
                // reported during inspection
                break;
            };
            match &decoded.marker {
                WalMarker::Header { .. } | WalMarker::Footer | WalMarker::Padding { .. } => {
                    continue
                }
                WalMarker::Prologue {
                    database_id,
                    collection_id,
                } => {
                    context = Some((*database_id, *collection_id));
                    continue;
                }
                marker if marker.transaction_id().is_some_and(|id| failed.contains(&id)) => {
                    continue
                }
                _ => {}
            }
            let scanned = scanned_marker(logfile.id(), decoded);
            self.engine.replay_marker(&scanned, context)?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Appends a footer to a logfile that was still open at the crash.
    fn seal_leftover(&self, logfile: &Logfile) -> CoreResult<()> {
        let tick = self.clock.next();
        let bytes = WalMarker::Footer.encode(tick)?;
        let offset = logfile.reserve(FOOTER_SIZE, tick);
        logfile.complete(offset, bytes);
        logfile.sync()?;
        logfile.set_status(LogfileStatus::Sealed);
        info!(logfile = %logfile.id(), "sealed logfile left open by previous run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::types::RevisionId;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_logfile(dir: &WalDirectory, id: u64, markers: &[(u64, WalMarker)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (tick, marker) in markers {
            marker.encode_into(Tick::new(*tick), &mut buf).unwrap();
        }
        let path = dir.logfile_path(LogfileId::new(id));
        std::fs::File::create(path).unwrap().write_all(&buf).unwrap();
        buf
    }

    fn header(id: u64) -> WalMarker {
        WalMarker::Header {
            logfile_id: LogfileId::new(id),
        }
    }

    fn doc(txn: u64, key: &str) -> WalMarker {
        WalMarker::Document {
            transaction_id: TransactionId::new(txn),
            key: key.into(),
            revision: RevisionId::new(1),
            body: vec![1, 2, 3],
        }
    }

    fn begin(txn: u64) -> WalMarker {
        WalMarker::BeginTransaction {
            database_id: DatabaseId::new(1),
            transaction_id: TransactionId::new(txn),
        }
    }

    fn commit(txn: u64) -> WalMarker {
        WalMarker::CommitTransaction {
            database_id: DatabaseId::new(1),
            transaction_id: TransactionId::new(txn),
        }
    }

    fn run(
        dir: &WalDirectory,
        shutdown: Option<ShutdownInfo>,
        ignore_errors: bool,
    ) -> (CoreResult<RecoveryOutcome>, TickClock) {
        let config = WalConfig::new(dir.path()).ignore_logfile_errors(ignore_errors);
        let clock = TickClock::new(Tick::ZERO);
        let engine = MemoryEngine::new();
        let outcome = Recovery::new(&config, dir, &clock, &engine, shutdown).run();
        (outcome, clock)
    }

    #[test]
    fn sealed_and_open_logfiles() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        write_logfile(&dir, 1, &[(2, header(1)), (3, doc(0, "a")), (4, WalMarker::Footer)]);
        write_logfile(&dir, 5, &[(6, header(5)), (7, doc(0, "b"))]);
        write_logfile(&dir, 9, &[]);

        let (outcome, clock) = run(&dir, None, false);
        let outcome = outcome.unwrap();

        let statuses: Vec<_> = outcome.logfiles.iter().map(|l| l.status()).collect();
        assert_eq!(
            statuses,
            vec![LogfileStatus::Sealed, LogfileStatus::Sealed, LogfileStatus::Empty]
        );
        assert_eq!(outcome.ids.last_sealed, LogfileId::new(5));
        assert_eq!(outcome.ids.last_opened, LogfileId::new(5));
        // the leftover footer took a tick above everything seen
        assert!(clock.current() > Tick::new(9));
        assert_eq!(outcome.logfiles[1].tick_min(), Tick::new(6));
    }

    #[test]
    fn collected_logfiles_are_not_rescanned() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        write_logfile(&dir, 1, &[(2, header(1)), (3, begin(44)), (4, WalMarker::Footer)]);

        let shutdown = ShutdownInfo {
            tick: Tick::new(4),
            last_collected: LogfileId::new(1),
            last_sealed: LogfileId::new(1),
            shutdown_time: Some(1),
        };
        let (outcome, _) = run(&dir, Some(shutdown), false);
        let outcome = outcome.unwrap();

        assert_eq!(outcome.logfiles[0].status(), LogfileStatus::Collected);
        assert_eq!(outcome.logfiles[0].tick_min(), Tick::new(2));
        assert_eq!(outcome.logfiles[0].tick_max(), Tick::new(4));
        // the open transaction lives in a collected logfile and is not seen
        assert!(outcome.failed_transactions.is_empty());
        assert_eq!(outcome.replayed, 0);
    }

    #[test]
    fn transaction_outcomes() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        write_logfile(
            &dir,
            1,
            &[
                (2, header(1)),
                (3, begin(10)),
                (4, doc(10, "a")),
                (5, commit(10)),
                (6, begin(11)),
                (7, doc(11, "b")),
                (
                    8,
                    WalMarker::AbortTransaction {
                        database_id: DatabaseId::new(1),
                        transaction_id: TransactionId::new(11),
                    },
                ),
                (9, begin(12)),
                (10, doc(12, "c")),
            ],
        );

        let (outcome, _) = run(&dir, None, false);
        let outcome = outcome.unwrap();
        let failed = outcome.failed_transactions;
        assert!(!failed.contains(&TransactionId::new(10)));
        assert!(failed.contains(&TransactionId::new(11)));
        assert!(failed.contains(&TransactionId::new(12)));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        let bytes = write_logfile(&dir, 1, &[(2, header(1)), (3, doc(0, "a"))]);
        let cut = bytes.len() - 5;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(dir.logfile_path(LogfileId::new(1)))
            .unwrap();
        file.set_len(cut as u64).unwrap();

        let (outcome, _) = run(&dir, None, false);
        let outcome = outcome.unwrap();
        let logfile = &outcome.logfiles[0];
        assert_eq!(logfile.tick_min(), Tick::new(2));
        assert_eq!(logfile.status(), LogfileStatus::Sealed);
        // header plus the footer appended when sealing
        assert_eq!(logfile.synced_bytes(), HEADER_SIZE + FOOTER_SIZE);
    }

    #[test]
    fn corruption_fails_unless_ignored() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        let mut bytes = write_logfile(&dir, 1, &[(2, header(1)), (3, doc(0, "a"))]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(dir.logfile_path(LogfileId::new(1)), &bytes).unwrap();

        let (outcome, _) = run(&dir, None, false);
        assert!(matches!(outcome, Err(CoreError::WalCorruption { .. })));

        let (outcome, _) = run(&dir, None, true);
        assert!(outcome.is_ok());
    }

    #[test]
    fn dropped_collections_and_databases_recorded() {
        let tmp = tempdir().unwrap();
        let dir = WalDirectory::open(tmp.path()).unwrap();
        write_logfile(
            &dir,
            1,
            &[
                (2, header(1)),
                (
                    3,
                    WalMarker::DropCollection {
                        database_id: DatabaseId::new(1),
                        collection_id: CollectionId::new(7),
                    },
                ),
                (
                    4,
                    WalMarker::DropDatabase {
                        database_id: DatabaseId::new(3),
                    },
                ),
                (5, WalMarker::Footer),
            ],
        );

        let (outcome, _) = run(&dir, None, false);
        let outcome = outcome.unwrap();
        assert!(outcome
            .dropped_collections
            .contains(&(DatabaseId::new(1), CollectionId::new(7))));
        assert!(outcome.dropped_databases.contains(&DatabaseId::new(3)));
    }
}
