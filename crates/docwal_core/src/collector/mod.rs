//! The collector: moves surviving markers of sealed logfiles into
//! permanent collection storage so the logfiles can be removed.
//!
//! A pass has two phases. The scan ([`scan`]) reads one sealed logfile,
//! keeps the last write per key and hands the survivors to the storage
//! engine. The transfer output is queued per collection ([`queue`]) and
//! later applied to the live primary index under the collection's locks.
//! A logfile becomes collected once every queued batch from it is applied.

pub(crate) mod queue;
pub(crate) mod scan;
pub(crate) mod thread;

use crate::engine::MarkerLocation;
use crate::marker::WalMarker;
use crate::types::{CollectionId, DatabaseId, DatafileId, LogfileId, RevisionId, Tick};
use std::collections::BTreeMap;

/// A marker read from a logfile, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedMarker {
    /// Tick of the marker.
    pub tick: Tick,
    /// Where the marker lives in the WAL.
    pub location: MarkerLocation,
    /// Encoded size.
    pub size: u32,
    /// Decoded marker.
    pub marker: WalMarker,
}

/// Kind of a transferred document operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert or update.
    Document,
    /// Removal.
    Remove,
}

/// A document operation copied into permanent storage, waiting to be
/// applied to the primary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorOperation {
    /// Tick of the original marker.
    pub tick: Tick,
    /// Primary key.
    pub key: String,
    /// Revision written or removed.
    pub revision: RevisionId,
    /// Insert/update or removal.
    pub kind: OperationKind,
    /// Location of the marker in the WAL.
    pub wal_location: MarkerLocation,
    /// Location of the copy in permanent storage.
    pub datafile_location: MarkerLocation,
    /// Encoded size of the copy.
    pub size: u32,
}

/// Alive/dead accounting for one datafile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatafileStatisticsDelta {
    /// Markers still referenced by the index.
    pub alive_count: u64,
    /// Bytes of those markers.
    pub alive_bytes: u64,
    /// Markers superseded before they were applied.
    pub dead_count: u64,
    /// Bytes of those markers.
    pub dead_bytes: u64,
    /// Remove markers.
    pub deletions: u64,
}

impl DatafileStatisticsDelta {
    /// Adds `other` to `self`.
    pub fn merge(&mut self, other: &Self) {
        self.alive_count += other.alive_count;
        self.alive_bytes += other.alive_bytes;
        self.dead_count += other.dead_count;
        self.dead_bytes += other.dead_bytes;
        self.deletions += other.deletions;
    }
}

/// Per-collection batch of one collector pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorCache {
    /// Collection the batch belongs to.
    pub collection_id: CollectionId,
    /// Owning database.
    pub database_id: DatabaseId,
    /// Logfile the batch was scanned from.
    pub logfile_id: LogfileId,
    /// Document and remove markers seen for the collection, survivors or not.
    pub total_operations: u64,
    /// Transferred operations in tick order.
    pub operations: Vec<CollectorOperation>,
    /// Statistics deltas per datafile.
    pub datafile_stats: BTreeMap<DatafileId, DatafileStatisticsDelta>,
    /// Last datafile written by the transfer.
    pub last_datafile: Option<DatafileId>,
}

impl CollectorCache {
    /// Creates an empty batch.
    pub fn new(database_id: DatabaseId, collection_id: CollectionId, logfile_id: LogfileId) -> Self {
        Self {
            collection_id,
            database_id,
            logfile_id,
            total_operations: 0,
            operations: Vec::new(),
            datafile_stats: BTreeMap::new(),
            last_datafile: None,
        }
    }

    /// Statistics entry of `datafile`, created on first use.
    pub fn stats_mut(&mut self, datafile: DatafileId) -> &mut DatafileStatisticsDelta {
        self.datafile_stats.entry(datafile).or_default()
    }
}
