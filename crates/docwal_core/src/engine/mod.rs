//! Contract between the WAL and the storage engine that owns permanent
//! per-collection storage.
//!
//! The collector hands surviving markers to [`StorageEngine::transfer_markers`]
//! and later repoints the collection's [`PrimaryIndex`] at the transferred
//! copies, holding the locks exposed through [`CollectionLocks`].

pub mod index;
pub mod memory;

pub use index::{IndexEntry, LocationKind, MarkerLocation, PrimaryIndex};
pub use memory::{MemoryCollection, MemoryEngine};

use crate::collector::{CollectorCache, DatafileStatisticsDelta, ScannedMarker};
use crate::error::CoreResult;
use crate::types::{CollectionId, DatabaseId, DatafileId, Tick};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Locks the collector takes on a collection while applying transferred
/// operations.
#[derive(Debug, Default)]
pub struct CollectionLocks {
    /// Held shared by the collector, exclusively by datafile compaction.
    pub compaction: RwLock<()>,
    /// Serializes index updates of the collection.
    pub write: Mutex<()>,
}

/// A collection's permanent storage as seen by the collector.
pub trait PhysicalCollection: Send + Sync + fmt::Debug {
    /// Collection id.
    fn id(&self) -> CollectionId;

    /// Owning database.
    fn database_id(&self) -> DatabaseId;

    /// Locks guarding compaction and index updates.
    fn locks(&self) -> &CollectionLocks;

    /// Live primary-key index.
    fn primary_index(&self) -> &PrimaryIndex;

    /// Highest tick already transferred into permanent storage.
    fn max_tick(&self) -> Tick;

    /// Folds alive/dead deltas into the datafile statistics.
    fn apply_datafile_statistics(&self, deltas: &BTreeMap<DatafileId, DatafileStatisticsDelta>);
}

/// The active storage engine.
pub trait StorageEngine: Send + Sync {
    /// Looks up a collection. `None` when it or its database is gone.
    fn collection(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
    ) -> Option<Arc<dyn PhysicalCollection>>;

    /// Returns true if the database exists.
    fn database_exists(&self, database_id: DatabaseId) -> bool;

    /// Durably copies `markers` into the collection's storage.
    ///
    /// Markers at or below the collection's max tick are already stored and
    /// must be skipped. For every copied document or remove marker the engine
    /// pushes a [`crate::collector::CollectorOperation`] into `cache` and
    /// sets `cache.last_datafile` to the datafile it wrote to last.
    ///
    /// # Errors
    ///
    /// A filesystem-full error makes the collector retry the whole logfile
    /// later; any other error is logged and retried as well.
    fn transfer_markers(
        &self,
        collection: &Arc<dyn PhysicalCollection>,
        cache: &mut CollectorCache,
        markers: &[ScannedMarker],
    ) -> CoreResult<()>;

    /// Applies one marker found during recovery. `context` is the
    /// (database, collection) pair of the last prologue.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be applied.
    fn replay_marker(
        &self,
        marker: &ScannedMarker,
        context: Option<(DatabaseId, CollectionId)>,
    ) -> CoreResult<()> {
        let _ = (marker, context);
        Ok(())
    }
}
