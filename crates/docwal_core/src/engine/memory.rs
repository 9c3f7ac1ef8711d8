//! Reference storage engine keeping datafiles in memory.
//!
//! Every collection owns one active datafile backed by an
//! [`InMemoryBackend`]. Transferred markers are re-encoded with their
//! original tick and appended to it. Used by the test suites and the CLI.

use crate::collector::{
    CollectorCache, CollectorOperation, DatafileStatisticsDelta, OperationKind, ScannedMarker,
};
use crate::engine::{
    CollectionLocks, IndexEntry, LocationKind, MarkerLocation, PhysicalCollection, PrimaryIndex,
    StorageEngine,
};
use crate::error::{CoreError, CoreResult};
use crate::marker::{decode_marker_at, WalMarker};
use crate::types::{CollectionId, DatabaseId, DatafileId, Tick};
use docwal_storage::{InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
struct Datafile {
    id: DatafileId,
    backend: InMemoryBackend,
}

/// A collection of the in-memory engine.
#[derive(Debug)]
pub struct MemoryCollection {
    id: CollectionId,
    database_id: DatabaseId,
    locks: CollectionLocks,
    index: PrimaryIndex,
    max_tick: AtomicU64,
    generation: AtomicU32,
    datafile: Mutex<Datafile>,
    statistics: Mutex<BTreeMap<DatafileId, DatafileStatisticsDelta>>,
}

impl MemoryCollection {
    fn new(
        database_id: DatabaseId,
        id: CollectionId,
        datafile: DatafileId,
        limit: Option<u64>,
    ) -> Self {
        let backend = limit.map_or_else(InMemoryBackend::new, InMemoryBackend::with_limit);
        Self {
            id,
            database_id,
            locks: CollectionLocks::default(),
            index: PrimaryIndex::new(),
            max_tick: AtomicU64::new(0),
            generation: AtomicU32::new(0),
            datafile: Mutex::new(Datafile {
                id: datafile,
                backend,
            }),
            statistics: Mutex::new(BTreeMap::new()),
        }
    }

    /// Points the index at a freshly written WAL marker, as a document
    /// write would after finalizing its slot.
    pub fn record_write(&self, key: impl Into<String>, entry: IndexEntry) {
        let _write = self.locks.write.lock();
        self.index.insert(key, entry);
    }

    /// Removes a key from the index, as a document removal would.
    pub fn record_remove(&self, key: &str) -> Option<IndexEntry> {
        let _write = self.locks.write.lock();
        self.index.remove(key)
    }

    /// Id of the active datafile.
    pub fn datafile_id(&self) -> DatafileId {
        self.datafile.lock().id
    }

    /// Accumulated alive/dead statistics per datafile.
    pub fn datafile_statistics(&self) -> BTreeMap<DatafileId, DatafileStatisticsDelta> {
        self.statistics.lock().clone()
    }

    /// Current relocation generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Reads the marker stored at a datafile location.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for WAL locations or locations of another
    /// datafile, and a corruption error if no marker starts there.
    pub fn read_marker(&self, location: MarkerLocation) -> CoreResult<(Tick, WalMarker)> {
        let datafile = self.datafile.lock();
        if location.kind != LocationKind::Datafile(datafile.id) {
            return Err(CoreError::invalid_operation(format!(
                "location {:?} is not in datafile {}",
                location.kind, datafile.id
            )));
        }
        let data = datafile.backend.read_all()?;
        let offset = usize::try_from(location.offset)
            .map_err(|_| CoreError::invalid_operation("datafile offset out of range"))?;
        let decoded = decode_marker_at(&data, offset)?.ok_or_else(|| {
            CoreError::wal_corruption(format!("no marker at datafile offset {offset}"))
        })?;
        Ok((decoded.tick, decoded.marker))
    }

    /// Simulates compaction: bumps the generation and rewrites every
    /// datafile location in the index to it, holding the compaction lock
    /// exclusively. Returns how many entries moved.
    pub fn compact(&self) -> usize {
        let _compaction = self.locks.compaction.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let moved = self.index.relocate_all(|_, entry| match entry.location.kind {
            LocationKind::Datafile(datafile) => Some(MarkerLocation::datafile(
                datafile,
                entry.location.offset,
                generation,
            )),
            LocationKind::Wal(_) => None,
        });
        debug!(collection = %self.id, generation, moved, "compacted collection");
        moved
    }

    fn transfer(&self, cache: &mut CollectorCache, markers: &[ScannedMarker]) -> CoreResult<()> {
        let mut datafile = self.datafile.lock();
        let start = datafile.backend.size()?;
        let result = self.append_markers(&mut datafile, cache, markers);
        match result {
            Ok(Some(max_tick)) => {
                datafile.backend.sync()?;
                self.max_tick.fetch_max(max_tick.as_u64(), Ordering::SeqCst);
                cache.last_datafile = Some(datafile.id);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                // a retried pass writes everything again
                datafile.backend.truncate(start)?;
                cache.operations.clear();
                Err(err)
            }
        }
    }

    fn append_markers(
        &self,
        datafile: &mut Datafile,
        cache: &mut CollectorCache,
        markers: &[ScannedMarker],
    ) -> CoreResult<Option<Tick>> {
        let already = Tick::new(self.max_tick.load(Ordering::SeqCst));
        let generation = self.generation();
        let mut max_tick = None;
        for scanned in markers {
            if scanned.tick <= already {
                trace!(tick = %scanned.tick, "marker already transferred");
                continue;
            }
            let bytes = scanned.marker.encode(scanned.tick)?;
            let offset = datafile.backend.append(&bytes)?;
            let location = MarkerLocation::datafile(datafile.id, offset, generation);
            max_tick = max_tick.max(Some(scanned.tick));

            let (key, revision, kind) = match &scanned.marker {
                WalMarker::Document { key, revision, .. } => {
                    (key.clone(), *revision, OperationKind::Document)
                }
                WalMarker::Remove { key, revision, .. } => {
                    (key.clone(), *revision, OperationKind::Remove)
                }
                _ => continue,
            };
            cache.operations.push(CollectorOperation {
                tick: scanned.tick,
                key,
                revision,
                kind,
                wal_location: scanned.location,
                datafile_location: location,
                size: scanned.size,
            });
        }
        Ok(max_tick)
    }
}

impl PhysicalCollection for MemoryCollection {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn locks(&self) -> &CollectionLocks {
        &self.locks
    }

    fn primary_index(&self) -> &PrimaryIndex {
        &self.index
    }

    fn max_tick(&self) -> Tick {
        Tick::new(self.max_tick.load(Ordering::SeqCst))
    }

    fn apply_datafile_statistics(&self, deltas: &BTreeMap<DatafileId, DatafileStatisticsDelta>) {
        let mut statistics = self.statistics.lock();
        for (datafile, delta) in deltas {
            statistics.entry(*datafile).or_default().merge(delta);
        }
    }
}

type Collections = BTreeMap<CollectionId, Arc<MemoryCollection>>;

/// In-memory [`StorageEngine`].
#[derive(Debug, Default)]
pub struct MemoryEngine {
    databases: RwLock<BTreeMap<DatabaseId, Collections>>,
    next_datafile: AtomicU64,
    datafile_limit: Option<u64>,
}

impl MemoryEngine {
    /// Creates an engine without databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine whose datafiles refuse to grow past `limit` bytes,
    /// failing transfers with a filesystem-full error.
    #[must_use]
    pub fn with_datafile_limit(limit: u64) -> Self {
        Self {
            datafile_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Creates a database. Returns false if it already exists.
    pub fn create_database(&self, database_id: DatabaseId) -> bool {
        let mut databases = self.databases.write();
        if databases.contains_key(&database_id) {
            return false;
        }
        databases.insert(database_id, Collections::new());
        true
    }

    /// Drops a database with all its collections.
    pub fn drop_database(&self, database_id: DatabaseId) -> bool {
        self.databases.write().remove(&database_id).is_some()
    }

    /// Returns the collection, creating it (and its database) if missing.
    pub fn create_collection(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
    ) -> Arc<MemoryCollection> {
        let mut databases = self.databases.write();
        let collections = databases.entry(database_id).or_default();
        if let Some(existing) = collections.get(&collection_id) {
            return Arc::clone(existing);
        }
        let datafile = DatafileId::new(self.next_datafile.fetch_add(1, Ordering::SeqCst) + 1);
        let collection = Arc::new(MemoryCollection::new(
            database_id,
            collection_id,
            datafile,
            self.datafile_limit,
        ));
        collections.insert(collection_id, Arc::clone(&collection));
        collection
    }

    /// Drops a collection.
    pub fn drop_collection(&self, database_id: DatabaseId, collection_id: CollectionId) -> bool {
        self.databases
            .write()
            .get_mut(&database_id)
            .is_some_and(|collections| collections.remove(&collection_id).is_some())
    }

    /// Looks up a collection with its concrete type.
    pub fn memory_collection(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
    ) -> Option<Arc<MemoryCollection>> {
        self.databases
            .read()
            .get(&database_id)
            .and_then(|collections| collections.get(&collection_id))
            .cloned()
    }
}

impl StorageEngine for MemoryEngine {
    fn collection(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
    ) -> Option<Arc<dyn PhysicalCollection>> {
        self.memory_collection(database_id, collection_id)
            .map(|collection| collection as Arc<dyn PhysicalCollection>)
    }

    fn database_exists(&self, database_id: DatabaseId) -> bool {
        self.databases.read().contains_key(&database_id)
    }

    fn transfer_markers(
        &self,
        collection: &Arc<dyn PhysicalCollection>,
        cache: &mut CollectorCache,
        markers: &[ScannedMarker],
    ) -> CoreResult<()> {
        let target = self
            .memory_collection(collection.database_id(), collection.id())
            .ok_or(CoreError::CollectionNotFound {
                database: collection.database_id(),
                collection: collection.id(),
            })?;
        target.transfer(cache, markers)
    }

    fn replay_marker(
        &self,
        scanned: &ScannedMarker,
        context: Option<(DatabaseId, CollectionId)>,
    ) -> CoreResult<()> {
        match &scanned.marker {
            WalMarker::CreateDatabase { database_id, .. } => {
                self.create_database(*database_id);
            }
            WalMarker::DropDatabase { database_id } => {
                self.drop_database(*database_id);
            }
            WalMarker::CreateCollection {
                database_id,
                collection_id,
                ..
            } => {
                self.create_collection(*database_id, *collection_id);
            }
            WalMarker::DropCollection {
                database_id,
                collection_id,
            } => {
                self.drop_collection(*database_id, *collection_id);
            }
            WalMarker::Document { key, revision, .. } => {
                let Some(collection) = context.and_then(|(db, cid)| self.memory_collection(db, cid))
                else {
                    return Ok(());
                };
                if scanned.tick > collection.max_tick() {
                    collection.index.insert(
                        key.clone(),
                        IndexEntry {
                            revision: *revision,
                            location: scanned.location,
                            size: scanned.size,
                        },
                    );
                }
            }
            WalMarker::Remove { key, .. } => {
                let Some(collection) = context.and_then(|(db, cid)| self.memory_collection(db, cid))
                else {
                    return Ok(());
                };
                if scanned.tick > collection.max_tick() {
                    collection.index.remove(key);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogfileId, RevisionId, TransactionId};

    const DB: DatabaseId = DatabaseId::new(1);
    const COL: CollectionId = CollectionId::new(2);

    fn document(tick: u64, key: &str, offset: u64) -> ScannedMarker {
        let marker = WalMarker::Document {
            transaction_id: TransactionId::default(),
            key: key.to_string(),
            revision: RevisionId::new(tick),
            body: vec![7; 8],
        };
        ScannedMarker {
            tick: Tick::new(tick),
            location: MarkerLocation::wal(LogfileId::new(1), offset),
            size: marker.encoded_len() as u32,
            marker,
        }
    }

    fn transfer(engine: &MemoryEngine, markers: &[ScannedMarker]) -> CoreResult<CollectorCache> {
        let collection = engine.collection(DB, COL).unwrap();
        let mut cache = CollectorCache::new(DB, COL, LogfileId::new(1));
        engine.transfer_markers(&collection, &mut cache, markers)?;
        Ok(cache)
    }

    #[test]
    fn transfer_copies_markers_and_skips_old_ticks() {
        let engine = MemoryEngine::new();
        let collection = engine.create_collection(DB, COL);

        let cache = transfer(&engine, &[document(5, "a", 0), document(6, "b", 100)]).unwrap();
        assert_eq!(cache.operations.len(), 2);
        assert_eq!(cache.last_datafile, Some(collection.datafile_id()));
        assert_eq!(collection.max_tick(), Tick::new(6));

        let (tick, marker) = collection
            .read_marker(cache.operations[1].datafile_location)
            .unwrap();
        assert_eq!(tick, Tick::new(6));
        assert_eq!(marker, document(6, "b", 100).marker);

        let again = transfer(&engine, &[document(6, "b", 100), document(7, "c", 200)]).unwrap();
        assert_eq!(again.operations.len(), 1);
        assert_eq!(again.operations[0].key, "c");
    }

    #[test]
    fn full_datafile_rolls_back() {
        let engine = MemoryEngine::with_datafile_limit(100);
        let collection = engine.create_collection(DB, COL);

        let markers = [document(1, "a", 0), document(2, "b", 64), document(3, "c", 128)];
        let err = transfer(&engine, &markers).unwrap_err();
        assert!(err.is_filesystem_full());
        assert_eq!(collection.max_tick(), Tick::ZERO);
    }

    #[test]
    fn compaction_bumps_datafile_locations() {
        let engine = MemoryEngine::new();
        let collection = engine.create_collection(DB, COL);
        let datafile = collection.datafile_id();
        collection.record_write(
            "a",
            IndexEntry {
                revision: RevisionId::new(1),
                location: MarkerLocation::datafile(datafile, 0, 0),
                size: 40,
            },
        );
        collection.record_write(
            "b",
            IndexEntry {
                revision: RevisionId::new(2),
                location: MarkerLocation::wal(LogfileId::new(3), 0),
                size: 40,
            },
        );

        assert_eq!(collection.compact(), 1);
        assert_eq!(collection.generation(), 1);
        assert_eq!(
            collection.primary_index().lookup("a").unwrap().location,
            MarkerLocation::datafile(datafile, 0, 1)
        );
    }

    #[test]
    fn replay_rebuilds_index() {
        let engine = MemoryEngine::new();
        let create = ScannedMarker {
            tick: Tick::new(1),
            location: MarkerLocation::wal(LogfileId::new(1), 0),
            size: 0,
            marker: WalMarker::CreateCollection {
                database_id: DB,
                collection_id: COL,
                definition: Vec::new(),
            },
        };
        engine.replay_marker(&create, None).unwrap();
        engine
            .replay_marker(&document(2, "a", 64), Some((DB, COL)))
            .unwrap();

        let collection = engine.memory_collection(DB, COL).unwrap();
        let entry = collection.primary_index().lookup("a").unwrap();
        assert_eq!(entry.revision, RevisionId::new(2));
        assert!(entry.location.is_wal());

        let drop = ScannedMarker {
            marker: WalMarker::DropDatabase { database_id: DB },
            ..create
        };
        engine.replay_marker(&drop, None).unwrap();
        assert!(!engine.database_exists(DB));
    }

    #[test]
    fn statistics_accumulate() {
        let engine = MemoryEngine::new();
        let collection = engine.create_collection(DB, COL);
        let mut deltas = BTreeMap::new();
        deltas.insert(
            collection.datafile_id(),
            DatafileStatisticsDelta {
                alive_count: 1,
                dead_count: 2,
                ..DatafileStatisticsDelta::default()
            },
        );
        collection.apply_datafile_statistics(&deltas);
        collection.apply_datafile_statistics(&deltas);
        let stats = collection.datafile_statistics();
        assert_eq!(stats[&collection.datafile_id()].dead_count, 4);
    }
}
