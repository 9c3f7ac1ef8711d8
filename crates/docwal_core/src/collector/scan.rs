//! First collector phase: reading a sealed logfile.

use crate::collector::ScannedMarker;
use crate::engine::MarkerLocation;
use crate::error::CoreResult;
use crate::marker::{DecodedMarker, MarkerIterator, WalMarker};
use crate::types::{CollectionId, DatabaseId, LogfileId, TransactionId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{trace, warn};

pub(crate) fn scanned_marker(logfile_id: LogfileId, decoded: DecodedMarker) -> ScannedMarker {
    ScannedMarker {
        tick: decoded.tick,
        location: MarkerLocation::wal(logfile_id, decoded.offset),
        size: decoded.size,
        marker: decoded.marker,
    }
}

#[derive(Debug, Default)]
struct CollectionScan {
    structural: Vec<ScannedMarker>,
    documents: HashMap<String, ScannedMarker>,
    total_operations: u64,
    dead_count: u64,
    dead_bytes: u64,
}

impl CollectionScan {
    fn count_dead(&mut self, size: u32) {
        self.dead_count += 1;
        self.dead_bytes += u64::from(size);
    }
}

/// Survivors of one collection after a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CollectionBatch {
    pub(crate) database_id: DatabaseId,
    pub(crate) collection_id: CollectionId,
    pub(crate) total_operations: u64,
    /// Document and remove markers that will never be transferred:
    /// superseded within the logfile or owned by a failed transaction.
    pub(crate) dead_count: u64,
    pub(crate) dead_bytes: u64,
    /// Structural markers in file order followed by document markers in
    /// tick order.
    pub(crate) markers: Vec<ScannedMarker>,
}

/// Accumulated scan state of one logfile.
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    context: Option<(DatabaseId, CollectionId)>,
    collections: BTreeMap<(DatabaseId, CollectionId), CollectionScan>,
    skipped_without_context: u64,
}

impl ScanState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply(&mut self, scanned: ScannedMarker, failed: &HashSet<TransactionId>) {
        match &scanned.marker {
            WalMarker::Header { .. }
            | WalMarker::Footer
            | WalMarker::Padding { .. }
            | WalMarker::BeginTransaction { .. }
            | WalMarker::CommitTransaction { .. }
            | WalMarker::AbortTransaction { .. }
            | WalMarker::CreateDatabase { .. } => {}

            WalMarker::Prologue {
                database_id,
                collection_id,
            } => self.context = Some((*database_id, *collection_id)),

            WalMarker::Document { key, .. } | WalMarker::Remove { key, .. } => {
                let Some(context) = self.context else {
                    self.skipped_without_context += 1;
                    return;
                };
                let key = key.clone();
                let collection = self.collections.entry(context).or_default();
                collection.total_operations += 1;
                if scanned
                    .marker
                    .transaction_id()
                    .is_some_and(|id| failed.contains(&id))
                {
                    collection.count_dead(scanned.size);
                    return;
                }
                match collection.documents.get(&key) {
                    Some(existing) if existing.tick >= scanned.tick => {
                        collection.count_dead(scanned.size);
                    }
                    _ => {
                        if let Some(older) = collection.documents.insert(key, scanned) {
                            collection.count_dead(older.size);
                        }
                    }
                }
            }

            WalMarker::DropCollection {
                database_id,
                collection_id,
            } => {
                self.collections.remove(&(*database_id, *collection_id));
            }

            WalMarker::DropDatabase { database_id } => {
                let database_id = *database_id;
                self.collections.retain(|(db, _), _| *db != database_id);
            }

            WalMarker::CreateCollection { .. }
            | WalMarker::RenameCollection { .. }
            | WalMarker::CreateIndex { .. }
            | WalMarker::DropIndex { .. }
            | WalMarker::AttributeDefinition { .. }
            | WalMarker::ShapeDefinition { .. } => {
                if let Some(context) = scanned.marker.collection_context() {
                    self.collections
                        .entry(context)
                        .or_default()
                        .structural
                        .push(scanned);
                }
            }
        }
    }

    pub(crate) fn into_batches(self) -> Vec<CollectionBatch> {
        if self.skipped_without_context > 0 {
            warn!(
                markers = self.skipped_without_context,
                "document markers without prologue skipped"
            );
        }
        self.collections
            .into_iter()
            .filter_map(|((database_id, collection_id), scan)| {
                let mut documents: Vec<ScannedMarker> = scan.documents.into_values().collect();
                documents.sort_by_key(|marker| marker.tick);
                let mut markers = scan.structural;
                markers.extend(documents);
                if markers.is_empty() && scan.total_operations == 0 {
                    return None;
                }
                Some(CollectionBatch {
                    database_id,
                    collection_id,
                    total_operations: scan.total_operations,
                    dead_count: scan.dead_count,
                    dead_bytes: scan.dead_bytes,
                    markers,
                })
            })
            .collect()
    }
}

/// Scans the bytes of a sealed logfile and returns the per-collection
/// survivors. Superseded markers and markers of `failed` transactions are
/// counted as dead and dropped.
///
/// # Errors
///
/// Returns a corruption error for malformed markers.
pub(crate) fn scan_logfile(
    logfile_id: LogfileId,
    data: &[u8],
    failed: &HashSet<TransactionId>,
) -> CoreResult<Vec<CollectionBatch>> {
    let mut state = ScanState::new();
    let mut count = 0u64;
    for decoded in MarkerIterator::new(data) {
        state.apply(scanned_marker(logfile_id, decoded?), failed);
        count += 1;
    }
    trace!(logfile = %logfile_id, markers = count, "scanned logfile");
    Ok(state.into_batches())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RevisionId, Tick};
    use proptest::prelude::*;

    const DB: DatabaseId = DatabaseId::new(1);
    const COL: CollectionId = CollectionId::new(10);

    struct LogBuilder {
        buf: Vec<u8>,
        tick: u64,
    }

    impl LogBuilder {
        fn new() -> Self {
            let mut builder = Self { buf: Vec::new(), tick: 0 };
            builder.push(WalMarker::Header {
                logfile_id: LogfileId::new(1),
            });
            builder
        }

        fn push(&mut self, marker: WalMarker) -> u64 {
            self.tick += 1;
            marker.encode_into(Tick::new(self.tick), &mut self.buf).unwrap();
            self.tick
        }

        fn at_tick(&mut self, tick: u64, marker: WalMarker) {
            self.tick = tick - 1;
            self.push(marker);
        }

        fn prologue(&mut self, db: DatabaseId, col: CollectionId) {
            self.push(WalMarker::Prologue {
                database_id: db,
                collection_id: col,
            });
        }
    }

    fn doc(txn: u64, key: &str, rev: u64) -> WalMarker {
        WalMarker::Document {
            transaction_id: TransactionId::new(txn),
            key: key.to_string(),
            revision: RevisionId::new(rev),
            body: b"{}".to_vec(),
        }
    }

    fn scan(builder: &LogBuilder, failed: &[u64]) -> Vec<CollectionBatch> {
        let failed: HashSet<TransactionId> = failed.iter().map(|id| TransactionId::new(*id)).collect();
        scan_logfile(LogfileId::new(1), &builder.buf, &failed).unwrap()
    }

    #[test]
    fn last_tick_wins_per_key() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.at_tick(100, doc(0, "k", 1));
        log.at_tick(150, doc(0, "k", 2));

        let batches = scan(&log, &[]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_operations, 2);
        assert_eq!(batches[0].markers.len(), 1);
        assert_eq!(batches[0].markers[0].tick, Tick::new(150));
    }

    #[test]
    fn superseded_and_failed_markers_count_dead() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(0, "k", 1));
        log.push(doc(0, "k", 2));
        log.push(doc(9, "other", 1));
        let first_size = doc(0, "k", 1).encoded_len() as u64;
        let failed_size = doc(9, "other", 1).encoded_len() as u64;

        let batches = scan(&log, &[9]);
        assert_eq!(batches[0].total_operations, 3);
        assert_eq!(batches[0].markers.len(), 1);
        assert_eq!(batches[0].dead_count, 2);
        assert_eq!(batches[0].dead_bytes, first_size + failed_size);
    }

    #[test]
    fn out_of_order_older_tick_counts_dead() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.at_tick(200, doc(0, "k", 2));
        log.at_tick(120, doc(0, "k", 1));

        let batches = scan(&log, &[]);
        assert_eq!(batches[0].markers[0].tick, Tick::new(200));
        assert_eq!(batches[0].dead_count, 1);
        assert_eq!(batches[0].dead_bytes, doc(0, "k", 1).encoded_len() as u64);
    }

    #[test]
    fn failed_transactions_counted_not_kept() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(7, "a", 1));
        log.push(doc(8, "b", 1));

        let batches = scan(&log, &[7]);
        assert_eq!(batches[0].total_operations, 2);
        let keys: Vec<_> = batches[0]
            .markers
            .iter()
            .map(|m| match &m.marker {
                WalMarker::Document { key, .. } => key.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["b".to_string()]);
    }

    #[test]
    fn structural_markers_come_first_in_file_order() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(0, "a", 1));
        log.push(WalMarker::CreateIndex {
            database_id: DB,
            collection_id: COL,
            index_id: 3,
            definition: vec![],
        });
        log.push(WalMarker::AttributeDefinition {
            database_id: DB,
            collection_id: COL,
            attribute_id: 1,
            name: "name".into(),
        });

        let batches = scan(&log, &[]);
        let types: Vec<_> = batches[0].markers.iter().map(|m| m.marker.marker_type()).collect();
        use crate::marker::MarkerType;
        assert_eq!(
            types,
            vec![MarkerType::CreateIndex, MarkerType::AttributeDefinition, MarkerType::Document]
        );
    }

    #[test]
    fn drop_collection_purges_state() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(0, "a", 1));
        log.prologue(DB, CollectionId::new(11));
        log.push(doc(0, "b", 1));
        log.push(WalMarker::DropCollection {
            database_id: DB,
            collection_id: COL,
        });

        let batches = scan(&log, &[]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].collection_id, CollectionId::new(11));
    }

    #[test]
    fn drop_database_purges_all_its_collections() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(0, "a", 1));
        log.prologue(DatabaseId::new(2), COL);
        log.push(doc(0, "b", 1));
        log.push(WalMarker::DropDatabase { database_id: DB });

        let batches = scan(&log, &[]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].database_id, DatabaseId::new(2));
    }

    #[test]
    fn documents_without_prologue_are_skipped() {
        let mut log = LogBuilder::new();
        log.push(doc(0, "a", 1));
        assert!(scan(&log, &[]).is_empty());
    }

    #[test]
    fn corrupt_marker_fails_scan() {
        let mut log = LogBuilder::new();
        log.prologue(DB, COL);
        log.push(doc(0, "a", 1));
        let last = log.buf.len() - 1;
        log.buf[last] ^= 0xff;
        let result = scan_logfile(LogfileId::new(1), &log.buf, &HashSet::new());
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn survivors_are_latest_write_per_key(keys in prop::collection::vec(0u8..8, 1..64)) {
            let mut log = LogBuilder::new();
            log.prologue(DB, COL);
            let mut latest: HashMap<String, u64> = HashMap::new();
            for (i, key) in keys.iter().enumerate() {
                let key = format!("k{key}");
                let tick = log.push(doc(0, &key, i as u64 + 1));
                latest.insert(key, tick);
            }

            let batches = scan(&log, &[]);
            prop_assert_eq!(batches.len(), 1);
            prop_assert_eq!(batches[0].total_operations, keys.len() as u64);
            prop_assert_eq!(batches[0].markers.len(), latest.len());
            prop_assert_eq!(batches[0].dead_count, (keys.len() - latest.len()) as u64);
            for pair in batches[0].markers.windows(2) {
                prop_assert!(pair[0].tick < pair[1].tick);
            }
            for marker in &batches[0].markers {
                let WalMarker::Document { key, .. } = &marker.marker else {
                    panic!("unexpected marker");
                };
                prop_assert_eq!(latest[key], marker.tick.as_u64());
            }
        }
    }
}
