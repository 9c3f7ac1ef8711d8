//! # docwal core
//!
//! Write-ahead log for a document store.
//!
//! This crate provides:
//! - Markers, the self-describing records stored in logfiles
//! - Logfiles and a concurrent slot allocator
//! - The [`LogfileManager`] with its allocator, synchronizer and remover
//!   threads, transaction and barrier bookkeeping, and write throttling
//! - The collector, which moves surviving markers into permanent
//!   collection storage
//! - The [`StorageEngine`] contract and an in-memory reference engine
//! - Request and response types of the WAL admin interface
//!
//! ## Example
//!
//! ```rust,no_run
//! use docwal_core::{
//!     CollectionId, DatabaseId, LogfileManager, MemoryEngine, RevisionId, TransactionId,
//!     WalConfig, WalMarker, WriteOptions,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> docwal_core::CoreResult<()> {
//! let engine = Arc::new(MemoryEngine::new());
//! engine.create_collection(DatabaseId::new(1), CollectionId::new(7));
//!
//! let manager = LogfileManager::open(WalConfig::new("wal"), engine)?;
//! let marker = WalMarker::Document {
//!     transaction_id: TransactionId::default(),
//!     key: "alice".into(),
//!     revision: RevisionId::new(1),
//!     body: b"{}".to_vec(),
//! };
//! let options = WriteOptions::for_collection(DatabaseId::new(1), CollectionId::new(7));
//! manager.allocate_and_write(&marker, options.wait_for_sync(true))?;
//! manager.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod collector;
pub mod config;
pub mod dir;
pub mod engine;
pub mod error;
pub mod marker;
pub mod stats;
pub mod types;
pub mod wal;

pub use collector::{
    CollectorCache, CollectorOperation, DatafileStatisticsDelta, OperationKind, ScannedMarker,
};
pub use config::{LiveSettings, WalConfig, MAX_ENTRY_SIZE, MAX_LOGFILE_SIZE, MIN_LOGFILE_SIZE};
pub use dir::WalDirectory;
pub use engine::{
    CollectionLocks, IndexEntry, LocationKind, MarkerLocation, MemoryCollection, MemoryEngine,
    PhysicalCollection, PrimaryIndex, StorageEngine,
};
pub use error::{CoreError, CoreResult};
pub use marker::{DecodedMarker, MarkerIterator, MarkerType, WalMarker};
pub use stats::{WalStats, WalStatsSnapshot};
pub use types::{
    BarrierId, CollectionId, DatabaseId, DatafileId, LogfileId, RevisionId, Tick, TickClock,
    TransactionId,
};
pub use wal::{
    Logfile, LogfileBarrier, LogfileIds, LogfileManager, LogfileRange, LogfileStatus,
    RunningTransactions, ShutdownInfo, Slot, SlotInfo, TickRangeLogfiles, WalState, WriteOptions,
    WriteThrottle,
};
