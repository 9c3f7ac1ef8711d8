//! A single logfile.
//!
//! A logfile is a fixed-capacity, append-only segment. Writers reserve byte
//! ranges through the slot allocator and complete them in any order; the
//! logfile keeps completed ranges until everything in front of them is
//! complete as well, then moves the contiguous prefix to its committed
//! region. The synchronizer appends committed bytes to the backing file and
//! syncs them.

use crate::error::CoreResult;
use crate::marker::MARKER_OVERHEAD;
use crate::types::{LogfileId, Tick};
use docwal_storage::{FileBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Encoded size of a header marker.
pub const HEADER_SIZE: u64 = MARKER_OVERHEAD as u64 + 8;

/// Encoded size of a footer marker.
pub const FOOTER_SIZE: u64 = MARKER_OVERHEAD as u64;

/// Lifecycle state of a logfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogfileStatus {
    /// Created ahead of need, no header yet.
    Empty,
    /// Current write target.
    Open,
    /// Footer reserved, waiting for outstanding slots and the synchronizer.
    SealRequested,
    /// Complete and durable, waiting for the collector.
    Sealed,
    /// Claimed by the collector.
    CollectionRequested,
    /// Every surviving operation has reached permanent storage.
    Collected,
}

impl LogfileStatus {
    /// Returns a short human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Open => "open",
            Self::SealRequested => "seal-requested",
            Self::Sealed => "sealed",
            Self::CollectionRequested => "collection-requested",
            Self::Collected => "collected",
        }
    }

    /// Returns true if the collector may claim a logfile in this state.
    #[must_use]
    pub const fn can_be_collected(self) -> bool {
        matches!(self, Self::Sealed | Self::CollectionRequested)
    }

    /// Returns true once no more bytes will be added.
    #[must_use]
    pub const fn is_sealed(self) -> bool {
        matches!(
            self,
            Self::Sealed | Self::CollectionRequested | Self::Collected
        )
    }
}

impl fmt::Display for LogfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct InFlight {
    size: u64,
    tick: Tick,
    bytes: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct PendingWrites {
    in_flight: BTreeMap<u64, InFlight>,
    unsynced: Vec<u8>,
    unsynced_tick: Tick,
}

/// One WAL logfile.
pub struct Logfile {
    id: LogfileId,
    path: PathBuf,
    capacity: u64,
    status: RwLock<LogfileStatus>,
    backend: Mutex<Box<dyn StorageBackend>>,
    pending: Mutex<PendingWrites>,
    reserved: AtomicU64,
    committed: AtomicU64,
    synced: AtomicU64,
    tick_min: AtomicU64,
    tick_max: AtomicU64,
    synced_tick: AtomicU64,
    users: AtomicU64,
    queued_caches: AtomicU64,
}

impl fmt::Debug for Logfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logfile")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("capacity", &self.capacity)
            .field("committed", &self.committed_bytes())
            .field("synced", &self.synced_bytes())
            .finish_non_exhaustive()
    }
}

impl Logfile {
    /// Creates a new empty logfile on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(id: LogfileId, path: &Path, capacity: u64) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Ok(Self::with_backend(id, path, capacity, Box::new(backend)))
    }

    /// Wraps an existing backend. Bytes already stored count as committed
    /// and synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn open_existing(
        id: LogfileId,
        path: &Path,
        capacity: u64,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        let logfile = Self::with_backend(id, path, capacity.max(size), backend);
        logfile.reserved.store(size, Ordering::SeqCst);
        logfile.committed.store(size, Ordering::SeqCst);
        logfile.synced.store(size, Ordering::SeqCst);
        Ok(logfile)
    }

    fn with_backend(
        id: LogfileId,
        path: &Path,
        capacity: u64,
        backend: Box<dyn StorageBackend>,
    ) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            capacity,
            status: RwLock::new(LogfileStatus::Empty),
            backend: Mutex::new(backend),
            pending: Mutex::new(PendingWrites::default()),
            reserved: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            synced: AtomicU64::new(0),
            tick_min: AtomicU64::new(0),
            tick_max: AtomicU64::new(0),
            synced_tick: AtomicU64::new(0),
            users: AtomicU64::new(0),
            queued_caches: AtomicU64::new(0),
        }
    }

    /// Returns the logfile id.
    pub fn id(&self) -> LogfileId {
        self.id
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the current status.
    pub fn status(&self) -> LogfileStatus {
        *self.status.read()
    }

    /// Sets the status unconditionally.
    pub fn set_status(&self, status: LogfileStatus) {
        let mut current = self.status.write();
        trace!(logfile = %self.id, from = %*current, to = %status, "logfile status change");
        *current = status;
    }

    /// Moves to `to` if the status is one of `from`. Returns whether it moved.
    pub fn transition(&self, from: &[LogfileStatus], to: LogfileStatus) -> bool {
        let mut current = self.status.write();
        if from.contains(&*current) {
            trace!(logfile = %self.id, from = %*current, to = %to, "logfile status change");
            *current = to;
            true
        } else {
            false
        }
    }

    /// Bytes handed out to slots.
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Bytes in the contiguous completed prefix.
    pub fn committed_bytes(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Bytes durably stored in the backing file.
    pub fn synced_bytes(&self) -> u64 {
        self.synced.load(Ordering::SeqCst)
    }

    /// Smallest committed tick, zero while nothing is committed.
    pub fn tick_min(&self) -> Tick {
        Tick::new(self.tick_min.load(Ordering::SeqCst))
    }

    /// Largest committed tick, zero while nothing is committed.
    pub fn tick_max(&self) -> Tick {
        Tick::new(self.tick_max.load(Ordering::SeqCst))
    }

    /// Tick of the last synced marker.
    pub fn synced_tick(&self) -> Tick {
        Tick::new(self.synced_tick.load(Ordering::SeqCst))
    }

    /// Sets the tick range of a logfile loaded from disk.
    pub fn set_tick_range(&self, min: Tick, max: Tick) {
        self.tick_min.store(min.as_u64(), Ordering::SeqCst);
        self.tick_max.store(max.as_u64(), Ordering::SeqCst);
        self.synced_tick.store(max.as_u64(), Ordering::SeqCst);
    }

    /// Returns true if `size` more bytes fit while leaving room for the
    /// footer and the `reserve_space` margin.
    pub fn is_writable(&self, size: u64, reserve_space: u64) -> bool {
        self.status() == LogfileStatus::Open && self.fits(size, reserve_space)
    }

    pub(crate) fn fits(&self, size: u64, reserve_space: u64) -> bool {
        self.reserved_bytes()
            .saturating_add(size)
            .saturating_add(FOOTER_SIZE)
            .saturating_add(reserve_space)
            <= self.capacity
    }

    /// Reserves `size` bytes for a marker with `tick` and returns its offset.
    ///
    /// Callers serialize reservations; the slot allocator does so under its
    /// state mutex.
    pub(crate) fn reserve(&self, size: u64, tick: Tick) -> u64 {
        let offset = self.reserved.fetch_add(size, Ordering::SeqCst);
        self.pending.lock().in_flight.insert(
            offset,
            InFlight {
                size,
                tick,
                bytes: None,
            },
        );
        offset
    }

    /// Hands over the encoded bytes of the reservation at `offset` and
    /// advances the committed region over every completed reservation in
    /// front. Returns the new committed offset.
    pub(crate) fn complete(&self, offset: u64, bytes: Vec<u8>) -> u64 {
        let mut pending = self.pending.lock();
        if let Some(entry) = pending.in_flight.get_mut(&offset) {
            entry.bytes = Some(bytes);
        }

        let mut committed = self.committed.load(Ordering::SeqCst);
        loop {
            let ready = pending
                .in_flight
                .first_key_value()
                .is_some_and(|(start, entry)| *start == committed && entry.bytes.is_some());
            if !ready {
                break;
            }
            let Some((_, entry)) = pending.in_flight.pop_first() else {
                break;
            };
            if let Some(bytes) = entry.bytes {
                pending.unsynced.extend_from_slice(&bytes);
            }
            pending.unsynced_tick = entry.tick;
            committed += entry.size;

            let tick = entry.tick.as_u64();
            if self.tick_min.load(Ordering::SeqCst) == 0 {
                self.tick_min.store(tick, Ordering::SeqCst);
            }
            self.tick_max.fetch_max(tick, Ordering::SeqCst);
        }
        self.committed.store(committed, Ordering::SeqCst);
        committed
    }

    /// Returns true if committed bytes wait for the synchronizer.
    pub fn needs_sync(&self) -> bool {
        !self.pending.lock().unsynced.is_empty()
    }

    /// Returns true if every reservation is complete and durable.
    pub fn is_fully_synced(&self) -> bool {
        let pending = self.pending.lock();
        pending.in_flight.is_empty()
            && pending.unsynced.is_empty()
            && self.synced_bytes() == self.reserved_bytes()
    }

    /// Appends committed bytes to the backing file and syncs it.
    ///
    /// Returns the tick of the last synced marker, or `None` if there was
    /// nothing to sync. The pending-writes lock is only held while the bytes
    /// are taken over, never during I/O.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the bytes stay queued for the next attempt.
    pub fn sync(&self) -> CoreResult<Option<Tick>> {
        let mut backend = self.backend.lock();

        let (bytes, tick) = {
            let mut pending = self.pending.lock();
            if pending.unsynced.is_empty() {
                return Ok(None);
            }
            (std::mem::take(&mut pending.unsynced), pending.unsynced_tick)
        };

        let synced_before = self.synced_bytes();
        let result: CoreResult<()> = backend
            .append(&bytes)
            .and_then(|_| backend.sync())
            .map_err(Into::into);

        match result {
            Ok(()) => {
                self.synced
                    .store(synced_before + bytes.len() as u64, Ordering::SeqCst);
                self.synced_tick.fetch_max(tick.as_u64(), Ordering::SeqCst);
                Ok(Some(tick))
            }
            Err(err) => {
                // drop a partially written tail before retrying
                let _ = backend.truncate(synced_before);
                let mut pending = self.pending.lock();
                let mut restored = bytes;
                restored.extend_from_slice(&pending.unsynced);
                pending.unsynced = restored;
                Err(err)
            }
        }
    }

    /// Reads every durable byte of the logfile.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read.
    pub fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.backend.lock().read_all()?)
    }

    /// Reads `len` durable bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies outside the backing file.
    pub fn read_range(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.lock().read_at(offset, len)?)
    }

    /// Cuts the backing file to `len` bytes. Used by recovery for torn tails.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub(crate) fn truncate(&self, len: u64) -> CoreResult<()> {
        self.backend.lock().truncate(len)?;
        self.reserved.store(len, Ordering::SeqCst);
        self.committed.store(len, Ordering::SeqCst);
        self.synced.store(len, Ordering::SeqCst);
        Ok(())
    }

    /// Registers a reader that must keep the logfile alive.
    pub fn acquire(&self) {
        self.users.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases a reader registered with [`Logfile::acquire`].
    pub fn release(&self) {
        let _ = self
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Number of registered readers.
    pub fn users(&self) -> u64 {
        self.users.load(Ordering::SeqCst)
    }

    /// Returns true once the remover may delete the logfile.
    pub fn can_be_removed(&self) -> bool {
        self.status() == LogfileStatus::Collected && self.users() == 0
    }

    pub(crate) fn add_queued_caches(&self, count: u64) {
        self.queued_caches.fetch_add(count, Ordering::SeqCst);
    }

    /// Marks one queued collector batch as done and returns how many remain.
    pub(crate) fn finish_queued_cache(&self) -> u64 {
        let previous = self
            .queued_caches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Number of collector batches still queued for this logfile.
    pub fn queued_caches(&self) -> u64 {
        self.queued_caches.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwal_storage::InMemoryBackend;

    fn memory_logfile(capacity: u64) -> Logfile {
        Logfile::open_existing(
            LogfileId::new(1),
            Path::new("logfile-1.db"),
            capacity,
            Box::new(InMemoryBackend::new()),
        )
        .unwrap()
    }

    #[test]
    fn out_of_order_completion_commits_prefix_only() {
        let logfile = memory_logfile(1024);
        let a = logfile.reserve(10, Tick::new(1));
        let b = logfile.reserve(20, Tick::new(2));
        let c = logfile.reserve(5, Tick::new(3));

        assert_eq!(logfile.complete(b, vec![2; 20]), 0);
        assert_eq!(logfile.complete(c, vec![3; 5]), 0);
        assert_eq!(logfile.tick_max(), Tick::ZERO);

        assert_eq!(logfile.complete(a, vec![1; 10]), 35);
        assert_eq!(logfile.tick_min(), Tick::new(1));
        assert_eq!(logfile.tick_max(), Tick::new(3));
    }

    #[test]
    fn sync_moves_committed_bytes_to_backend() {
        let logfile = memory_logfile(1024);
        let a = logfile.reserve(4, Tick::new(7));
        logfile.complete(a, b"abcd".to_vec());

        assert!(logfile.needs_sync());
        assert_eq!(logfile.sync().unwrap(), Some(Tick::new(7)));
        assert!(!logfile.needs_sync());
        assert_eq!(logfile.synced_bytes(), 4);
        assert!(logfile.is_fully_synced());
        assert_eq!(logfile.read_all().unwrap(), b"abcd");
        assert_eq!(logfile.sync().unwrap(), None);
    }

    #[test]
    fn failed_sync_keeps_bytes_queued() {
        let logfile = Logfile::open_existing(
            LogfileId::new(2),
            Path::new("logfile-2.db"),
            1024,
            Box::new(InMemoryBackend::with_limit(6)),
        )
        .unwrap();

        let a = logfile.reserve(4, Tick::new(1));
        logfile.complete(a, b"abcd".to_vec());
        logfile.sync().unwrap();

        let b = logfile.reserve(4, Tick::new(2));
        logfile.complete(b, b"efgh".to_vec());
        let err = logfile.sync().unwrap_err();
        assert!(err.is_filesystem_full());
        assert!(logfile.needs_sync());
        assert_eq!(logfile.synced_bytes(), 4);
    }

    #[test]
    fn writable_leaves_room_for_footer() {
        let logfile = memory_logfile(HEADER_SIZE + 100 + FOOTER_SIZE);
        logfile.set_status(LogfileStatus::Open);
        logfile.reserve(HEADER_SIZE, Tick::new(1));

        assert!(logfile.is_writable(100, 0));
        assert!(!logfile.is_writable(101, 0));
        assert!(!logfile.is_writable(100, 1));
    }

    #[test]
    fn transition_only_from_listed_states() {
        let logfile = memory_logfile(1024);
        logfile.set_status(LogfileStatus::Sealed);

        assert!(!logfile.transition(&[LogfileStatus::Open], LogfileStatus::Collected));
        assert!(logfile.transition(
            &[LogfileStatus::Sealed],
            LogfileStatus::CollectionRequested
        ));
        assert_eq!(logfile.status(), LogfileStatus::CollectionRequested);
    }

    #[test]
    fn removal_waits_for_users() {
        let logfile = memory_logfile(1024);
        logfile.set_status(LogfileStatus::Collected);
        logfile.acquire();
        assert!(!logfile.can_be_removed());
        logfile.release();
        logfile.release();
        assert_eq!(logfile.users(), 0);
        assert!(logfile.can_be_removed());
    }
}
