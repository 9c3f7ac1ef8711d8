//! The write-ahead log.
//!
//! Writers reserve slots in the current logfile, encode their marker into
//! the slot and finalize it. Finished slots are committed in file order and
//! made durable by the synchronizer thread. Full logfiles are sealed,
//! collected into permanent storage and eventually removed.
//!
//! ## Logfile Lifecycle
//!
//! ```text
//! Empty -> Open -> SealRequested -> Sealed -> CollectionRequested -> Collected -> (removed)
//! ```
//!
//! - **Empty**: pre-created by the allocator thread, no header yet
//! - **Open**: the single write target, starts with a header marker
//! - **SealRequested**: footer reserved, waiting for outstanding slots
//!   and the synchronizer
//! - **Sealed**: every byte synced, eligible for collection
//! - **CollectionRequested**: claimed by the collector
//! - **Collected**: survivors transferred, kept for the historic window
//!   and barriers before the remover deletes it
//!
//! ## Recovery Policy
//!
//! On open every logfile not yet collected according to the `SHUTDOWN`
//! file is scanned. A torn tail (incomplete last marker) is cut off and the
//! logfile sealed. A checksum mismatch or malformed marker fails the open
//! unless `ignore_logfile_errors` is set. Transactions without a commit
//! marker are treated as failed and their markers are never collected.
//!
//! ## Invariants
//!
//! - Ticks grow strictly in file order and across logfiles
//! - A logfile is collected only after every older logfile
//! - A logfile is removed only when it is collected, unused, past the
//!   historic window and below every live barrier

pub(crate) mod barrier;
pub(crate) mod inventory;
pub(crate) mod logfile;
pub(crate) mod manager;
pub(crate) mod recovery;
pub(crate) mod shutdown;
pub(crate) mod slots;
pub(crate) mod threads;
pub(crate) mod throttle;
pub(crate) mod transactions;

pub use barrier::LogfileBarrier;
pub use inventory::LogfileIds;
pub use logfile::{Logfile, LogfileStatus, FOOTER_SIZE, HEADER_SIZE};
pub use manager::{LogfileManager, LogfileRange, TickRangeLogfiles, WalState, WriteOptions};
pub use shutdown::ShutdownInfo;
pub use slots::{Slot, SlotInfo, PROLOGUE_SIZE};
pub use throttle::WriteThrottle;
pub use transactions::{RunningTransactions, TransactionData, TRANSACTION_BUCKETS};
