//! Concurrent slot allocation.
//!
//! Writers reserve a byte range ("slot") in the current logfile under a
//! short mutex that also assigns the marker's tick, so ticks grow in file
//! order. Encoding happens outside the lock into the slot's own buffer.
//! Finalizing hands the bytes to the logfile, which commits the contiguous
//! prefix of finished slots for the synchronizer.

use crate::config::{LiveSettings, MAX_ENTRY_SIZE};
use crate::engine::MarkerLocation;
use crate::error::{CoreError, CoreResult};
use crate::marker::{WalMarker, MARKER_OVERHEAD};
use crate::stats::WalStats;
use crate::types::{CollectionId, DatabaseId, LogfileId, Tick, TickClock};
use crate::wal::inventory::Inventory;
use crate::wal::logfile::{Logfile, LogfileStatus, FOOTER_SIZE, HEADER_SIZE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Size of a prologue marker.
pub const PROLOGUE_SIZE: u64 = MARKER_OVERHEAD as u64 + 16;

const ALLOCATION_POLL: Duration = Duration::from_millis(10);

/// Where a finalized marker landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Logfile holding the marker.
    pub logfile_id: LogfileId,
    /// Byte offset inside the logfile.
    pub offset: u64,
    /// Encoded marker size.
    pub size: u32,
    /// Tick assigned to the marker.
    pub tick: Tick,
}

impl SlotInfo {
    /// Location handle of the marker.
    pub fn location(&self) -> MarkerLocation {
        MarkerLocation::wal(self.logfile_id, self.offset)
    }
}

/// A reserved region of a logfile.
///
/// A slot must be filled with [`Slot::write`] and handed back through
/// `finalize`. Dropping an unfinalized slot fills the region with padding so
/// later slots are not held back.
#[derive(Debug)]
pub struct Slot {
    logfile: Arc<Logfile>,
    offset: u64,
    size: u32,
    tick: Tick,
    bytes: Option<Vec<u8>>,
    finalized: bool,
    stats: Arc<WalStats>,
}

impl Slot {
    /// Tick assigned to the marker in this slot.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Logfile the slot lives in.
    pub fn logfile_id(&self) -> LogfileId {
        self.logfile.id()
    }

    /// Byte offset of the slot.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reserved size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Location handle the marker will have once finalized.
    pub fn location(&self) -> MarkerLocation {
        MarkerLocation::wal(self.logfile.id(), self.offset)
    }

    /// Encodes `marker` with the slot's tick into the slot buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the encoded size differs from the
    /// reserved size.
    pub fn write(&mut self, marker: &WalMarker) -> CoreResult<()> {
        let mut buf = Vec::with_capacity(self.size as usize);
        marker.encode_into(self.tick, &mut buf)?;
        if buf.len() != self.size as usize {
            return Err(CoreError::invalid_operation(format!(
                "{} marker of {} bytes does not match slot of {} bytes",
                marker.marker_type().name(),
                buf.len(),
                self.size
            )));
        }
        self.bytes = Some(buf);
        Ok(())
    }

    fn complete(&mut self) -> CoreResult<(SlotInfo, Arc<Logfile>)> {
        let bytes = self
            .bytes
            .take()
            .ok_or_else(|| CoreError::invalid_operation("slot finalized before it was written"))?;
        self.logfile.complete(self.offset, bytes);
        self.finalized = true;
        let info = SlotInfo {
            logfile_id: self.logfile.id(),
            offset: self.offset,
            size: self.size,
            tick: self.tick,
        };
        Ok((info, Arc::clone(&self.logfile)))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        error!(
            logfile = %self.logfile.id(),
            offset = self.offset,
            tick = %self.tick,
            "slot dropped without finalize, writing padding"
        );
        self.stats.record_abandoned_slot();
        match WalMarker::padding(self.size as usize).and_then(|marker| marker.encode(self.tick)) {
            Ok(bytes) => {
                self.logfile.complete(self.offset, bytes);
            }
            Err(err) => error!(error = %err, "cannot encode padding for abandoned slot"),
        }
    }
}

/// Result of sealing the current logfile on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SealOutcome {
    /// No logfile was ever opened.
    NothingOpen,
    /// The current logfile holds only its header and was left open.
    Unused(LogfileId),
    /// The logfile was sealed.
    Sealed(LogfileId),
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<Arc<Logfile>>,
    last_context: Option<(DatabaseId, CollectionId)>,
}

/// Slot allocator over the logfile inventory.
#[derive(Debug)]
pub(crate) struct Slots {
    inventory: Arc<Inventory>,
    clock: Arc<TickClock>,
    settings: Arc<LiveSettings>,
    stats: Arc<WalStats>,
    reserve_space: u64,
    flush_timeout: Duration,
    last_assigned: AtomicU64,
    state: Mutex<SlotState>,
}

impl Slots {
    pub(crate) fn new(
        inventory: Arc<Inventory>,
        clock: Arc<TickClock>,
        settings: Arc<LiveSettings>,
        stats: Arc<WalStats>,
        reserve_space: u64,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            clock,
            settings,
            stats,
            reserve_space,
            flush_timeout,
            last_assigned: AtomicU64::new(0),
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Draws a marker tick from the shared clock. Taking the locked state
    /// keeps marker ticks in reservation order; ids drawn from the clock
    /// elsewhere only leave gaps.
    fn next_tick(&self, _state: &mut SlotState) -> Tick {
        let tick = self.clock.next();
        self.last_assigned.fetch_max(tick.as_u64(), Ordering::SeqCst);
        tick
    }

    /// Tick of the newest reserved marker.
    pub(crate) fn last_assigned_tick(&self) -> Tick {
        Tick::new(self.last_assigned.load(Ordering::SeqCst))
    }

    /// Space a logfile needs to take a marker of `size` bytes right after
    /// its header, including a prologue and the footer.
    fn required_capacity(&self, size: u64) -> u64 {
        HEADER_SIZE + PROLOGUE_SIZE + size + FOOTER_SIZE + self.reserve_space
    }

    /// Reserves a slot of `size` bytes.
    ///
    /// With a `context`, a prologue marker is written first whenever the
    /// (database, collection) pair differs from the last one written to the
    /// current logfile.
    pub(crate) fn allocate(
        &self,
        size: u32,
        context: Option<(DatabaseId, CollectionId)>,
    ) -> CoreResult<Slot> {
        let size64 = u64::from(size);
        if size64 > MAX_ENTRY_SIZE {
            return Err(CoreError::DocumentTooLarge {
                size: size64,
                max: MAX_ENTRY_SIZE,
            });
        }
        let required = self.required_capacity(size64);
        let standard = self.settings.logfile_size();
        if required > standard && !self.settings.allow_oversize_entries() {
            return Err(CoreError::DocumentTooLarge {
                size: size64,
                max: standard.saturating_sub(required - size64),
            });
        }

        let started = Instant::now();
        loop {
            if !self.inventory.writes_allowed() {
                return Err(CoreError::ReadOnly);
            }

            {
                let mut state = self.state.lock();
                if let Some(current) = state.current.clone() {
                    if let Some(slot) = self.try_reserve(&mut state, &current, size, context)? {
                        return Ok(slot);
                    }
                    self.seal_locked(&mut state)?;
                }

                let (found, discarded) = self.inventory.take_empty(required);
                for logfile in discarded {
                    debug!(logfile = %logfile.id(), capacity = logfile.capacity(), "discarding undersized empty logfile");
                    if let Err(err) = std::fs::remove_file(logfile.path()) {
                        debug!(logfile = %logfile.id(), error = %err, "cannot delete undersized logfile");
                    }
                }
                if let Some(logfile) = found {
                    self.open_locked(&mut state, logfile)?;
                    continue;
                }
                self.inventory.request_allocation(required);
            }

            let waited = started.elapsed();
            if waited >= self.flush_timeout {
                return Err(CoreError::NoWritableLogfile { waited });
            }
            self.inventory.logfile_created.wait(ALLOCATION_POLL);
        }
    }

    fn try_reserve(
        &self,
        state: &mut SlotState,
        current: &Arc<Logfile>,
        size: u32,
        context: Option<(DatabaseId, CollectionId)>,
    ) -> CoreResult<Option<Slot>> {
        let prologue = context.filter(|ctx| state.last_context != Some(*ctx));
        let total = u64::from(size) + if prologue.is_some() { PROLOGUE_SIZE } else { 0 };
        if !current.is_writable(total, self.reserve_space) {
            return Ok(None);
        }

        if let Some((database_id, collection_id)) = prologue {
            let tick = self.next_tick(state);
            let bytes = WalMarker::Prologue {
                database_id,
                collection_id,
            }
            .encode(tick)?;
            let offset = current.reserve(PROLOGUE_SIZE, tick);
            current.complete(offset, bytes);
            self.stats.record_marker(PROLOGUE_SIZE);
            state.last_context = Some((database_id, collection_id));
        }

        let tick = self.next_tick(state);
        let offset = current.reserve(u64::from(size), tick);
        Ok(Some(Slot {
            logfile: Arc::clone(current),
            offset,
            size,
            tick,
            bytes: None,
            finalized: false,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn open_locked(&self, state: &mut SlotState, logfile: Arc<Logfile>) -> CoreResult<()> {
        let tick = self.next_tick(state);
        let bytes = WalMarker::Header {
            logfile_id: logfile.id(),
        }
        .encode(tick)?;
        logfile.set_status(LogfileStatus::Open);
        let offset = logfile.reserve(HEADER_SIZE, tick);
        logfile.complete(offset, bytes);
        self.stats.record_marker(HEADER_SIZE);

        self.inventory.set_last_opened(logfile.id());
        info!(logfile = %logfile.id(), capacity = logfile.capacity(), "opened logfile");
        state.current = Some(logfile);
        state.last_context = None;
        // keep the reserve topped up
        self.inventory.allocator.notify();
        Ok(())
    }

    fn seal_locked(&self, state: &mut SlotState) -> CoreResult<Option<LogfileId>> {
        let Some(logfile) = state.current.take() else {
            return Ok(None);
        };
        state.last_context = None;

        let tick = self.next_tick(state);
        let bytes = WalMarker::Footer.encode(tick)?;
        logfile.set_status(LogfileStatus::SealRequested);
        let offset = logfile.reserve(FOOTER_SIZE, tick);
        logfile.complete(offset, bytes);
        self.stats.record_marker(FOOTER_SIZE);
        self.inventory.update_committed_tick(tick);

        debug!(logfile = %logfile.id(), tick = %tick, "seal requested");
        self.inventory.synchronizer.notify();
        Ok(Some(logfile.id()))
    }

    /// Seals the current logfile unless it holds nothing but its header.
    pub(crate) fn seal_current(&self) -> CoreResult<SealOutcome> {
        let mut state = self.state.lock();
        let Some(current) = state.current.clone() else {
            return Ok(SealOutcome::NothingOpen);
        };
        if current.reserved_bytes() <= HEADER_SIZE {
            return Ok(SealOutcome::Unused(current.id()));
        }
        match self.seal_locked(&mut state)? {
            Some(id) => Ok(SealOutcome::Sealed(id)),
            None => Ok(SealOutcome::NothingOpen),
        }
    }

    #[cfg(test)]
    fn current(&self) -> Option<Arc<Logfile>> {
        self.state.lock().current.clone()
    }

    /// Publishes a written slot and optionally waits until it is durable.
    pub(crate) fn finalize(&self, mut slot: Slot, wait_for_sync: bool) -> CoreResult<SlotInfo> {
        let (info, logfile) = slot.complete()?;
        drop(slot);
        self.stats.record_marker(u64::from(info.size));
        self.inventory.update_committed_tick(logfile.tick_max());

        if wait_for_sync {
            self.inventory.synchronizer.notify();
            let end = info.offset + u64::from(info.size);
            let started = Instant::now();
            while logfile.synced_bytes() < end {
                let waited = started.elapsed();
                if waited >= self.flush_timeout {
                    return Err(CoreError::lock_timeout("waiting for sync", waited));
                }
                self.inventory.synced.wait(ALLOCATION_POLL);
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use crate::marker::MarkerIterator;
    use crate::types::{RevisionId, TransactionId};
    use docwal_storage::InMemoryBackend;
    use std::path::Path;

    struct Harness {
        inventory: Arc<Inventory>,
        slots: Slots,
    }

    fn harness(logfiles: &[(u64, u64)]) -> Harness {
        let inventory = Arc::new(Inventory::new());
        for (id, capacity) in logfiles {
            let logfile = Logfile::open_existing(
                LogfileId::new(*id),
                Path::new("unused"),
                *capacity,
                Box::new(InMemoryBackend::new()),
            )
            .unwrap();
            inventory.insert(Arc::new(logfile));
        }
        inventory.set_writes_allowed(true);
        let settings = Arc::new(LiveSettings::from_config(
            &WalConfig::new("unused").logfile_size(64 * 1024),
        ));
        let slots = Slots::new(
            Arc::clone(&inventory),
            Arc::new(TickClock::new(Tick::new(100))),
            settings,
            Arc::new(WalStats::new()),
            0,
            Duration::from_millis(50),
        );
        Harness { inventory, slots }
    }

    fn document(key: &str) -> WalMarker {
        WalMarker::Document {
            transaction_id: TransactionId::new(0),
            key: key.to_string(),
            revision: RevisionId::new(1),
            body: vec![7; 16],
        }
    }

    fn write(slots: &Slots, marker: &WalMarker, context: Option<(DatabaseId, CollectionId)>) -> SlotInfo {
        let mut slot = slots.allocate(marker.encoded_len() as u32, context).unwrap();
        slot.write(marker).unwrap();
        slots.finalize(slot, false).unwrap()
    }

    #[test]
    fn first_allocation_opens_logfile_with_header() {
        let h = harness(&[(1, 64 * 1024)]);
        let info = write(&h.slots, &document("a"), None);

        assert_eq!(info.logfile_id, LogfileId::new(1));
        assert_eq!(info.offset, HEADER_SIZE);
        let logfile = h.inventory.get(LogfileId::new(1)).unwrap();
        assert_eq!(logfile.status(), LogfileStatus::Open);
        assert_eq!(h.inventory.ids().last_opened, LogfileId::new(1));
    }

    #[test]
    fn ticks_come_from_the_clock() {
        let h = harness(&[(1, 64 * 1024)]);
        let slot = h.slots.allocate(64, None).unwrap();

        // header at 101, slot at 102
        assert_eq!(slot.tick(), Tick::new(102));
        assert_eq!(h.slots.last_assigned_tick(), Tick::new(102));
        drop(slot);

        let info = write(&h.slots, &document("a"), None);
        assert_eq!(info.tick, Tick::new(103));
        assert_eq!(h.slots.seal_current().unwrap(), SealOutcome::Sealed(LogfileId::new(1)));
        assert_eq!(h.slots.last_assigned_tick(), Tick::new(104));
    }

    #[test]
    fn prologue_written_on_context_change() {
        let h = harness(&[(1, 64 * 1024)]);
        let ctx_a = Some((DatabaseId::new(1), CollectionId::new(10)));
        let ctx_b = Some((DatabaseId::new(1), CollectionId::new(11)));

        let first = write(&h.slots, &document("a"), ctx_a);
        let second = write(&h.slots, &document("b"), ctx_a);
        let third = write(&h.slots, &document("c"), ctx_b);

        assert_eq!(first.offset, HEADER_SIZE + PROLOGUE_SIZE);
        let doc_size = document("a").encoded_len() as u64;
        assert_eq!(second.offset, first.offset + doc_size);
        assert_eq!(third.offset, second.offset + doc_size + PROLOGUE_SIZE);
    }

    #[test]
    fn ticks_follow_file_order() {
        let h = harness(&[(1, 64 * 1024)]);
        let mut slots: Vec<Slot> = (0..5)
            .map(|i| {
                let marker = document(&format!("k{i}"));
                h.slots.allocate(marker.encoded_len() as u32, None).unwrap()
            })
            .collect();
        for pair in slots.windows(2) {
            assert!(pair[0].tick() < pair[1].tick());
            assert!(pair[0].offset() < pair[1].offset());
        }
        // finalize out of order
        while let Some(mut slot) = slots.pop() {
            let marker = document(&format!("k{}", slots.len()));
            slot.write(&marker).unwrap();
            h.slots.finalize(slot, false).unwrap();
        }
        let logfile = h.inventory.get(LogfileId::new(1)).unwrap();
        assert_eq!(logfile.committed_bytes(), logfile.reserved_bytes());
    }

    #[test]
    fn full_logfile_is_sealed_and_next_opened() {
        let h = harness(&[(1, 1024), (2, 64 * 1024)]);
        let marker = WalMarker::Document {
            transaction_id: TransactionId::new(0),
            key: "big".to_string(),
            revision: RevisionId::new(1),
            body: vec![1; 600],
        };
        let first = write(&h.slots, &marker, None);
        let second = write(&h.slots, &marker, None);

        assert_eq!(first.logfile_id, LogfileId::new(1));
        assert_eq!(second.logfile_id, LogfileId::new(2));
        assert!(first.tick < second.tick);
        let sealed = h.inventory.get(LogfileId::new(1)).unwrap();
        assert_eq!(sealed.status(), LogfileStatus::SealRequested);
    }

    #[test]
    fn undersized_empty_logfiles_are_discarded() {
        let h = harness(&[(1, 128), (2, 64 * 1024)]);
        let info = write(&h.slots, &document("a"), None);

        assert_eq!(info.logfile_id, LogfileId::new(2));
        assert!(h.inventory.get(LogfileId::new(1)).is_none());
    }

    #[test]
    fn seal_sets_seal_requested_and_appends_footer() {
        let h = harness(&[(1, 64 * 1024)]);
        write(&h.slots, &document("a"), None);
        let outcome = h.slots.seal_current().unwrap();
        assert_eq!(outcome, SealOutcome::Sealed(LogfileId::new(1)));

        let logfile = h.inventory.get(LogfileId::new(1)).unwrap();
        assert_eq!(logfile.status(), LogfileStatus::SealRequested);
        logfile.sync().unwrap();
        let bytes = logfile.read_all().unwrap();
        let markers: Vec<_> = MarkerIterator::new(&bytes).map(|m| m.unwrap().marker).collect();
        assert_eq!(markers.last(), Some(&WalMarker::Footer));
        assert!(h.slots.current().is_none());
    }

    #[test]
    fn seal_of_header_only_logfile_is_skipped() {
        let h = harness(&[(1, 64 * 1024)]);
        assert_eq!(h.slots.seal_current().unwrap(), SealOutcome::NothingOpen);

        let slot = h.slots.allocate(64, None).unwrap();
        drop(slot);
        // the abandoned slot was padded, so the logfile holds more than its header
        assert_eq!(
            h.slots.seal_current().unwrap(),
            SealOutcome::Sealed(LogfileId::new(1))
        );
    }

    #[test]
    fn dropped_slot_is_padded() {
        let h = harness(&[(1, 64 * 1024)]);
        let abandoned = h.slots.allocate(64, None).unwrap();
        let info = write(&h.slots, &document("after"), None);
        drop(abandoned);

        let logfile = h.inventory.get(LogfileId::new(1)).unwrap();
        assert_eq!(logfile.committed_bytes(), info.offset + u64::from(info.size));
        logfile.sync().unwrap();
        let bytes = logfile.read_all().unwrap();
        let types: Vec<_> = MarkerIterator::new(&bytes)
            .map(|m| m.unwrap().marker.marker_type())
            .collect();
        assert_eq!(
            types,
            vec![
                crate::marker::MarkerType::Header,
                crate::marker::MarkerType::Padding,
                crate::marker::MarkerType::Document
            ]
        );
    }

    #[test]
    fn wrong_size_write_is_rejected() {
        let h = harness(&[(1, 64 * 1024)]);
        let mut slot = h.slots.allocate(10_000, None).unwrap();
        assert!(slot.write(&document("a")).is_err());
    }

    #[test]
    fn oversize_entry_gets_dedicated_logfile_request() {
        let h = harness(&[]);
        let result = h.slots.allocate(100 * 1024, None);
        assert!(matches!(result, Err(CoreError::NoWritableLogfile { .. })));
        let requested = h.inventory.take_allocation_request().unwrap();
        assert!(requested > 100 * 1024);
    }

    #[test]
    fn oversize_rejected_when_disallowed() {
        let h = harness(&[(1, 64 * 1024)]);
        h.slots.settings.set_allow_oversize_entries(false);
        let result = h.slots.allocate(100 * 1024, None);
        assert!(matches!(result, Err(CoreError::DocumentTooLarge { .. })));
    }

    #[test]
    fn read_only_rejects_allocation() {
        let h = harness(&[(1, 64 * 1024)]);
        h.inventory.set_writes_allowed(false);
        assert!(matches!(h.slots.allocate(64, None), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn concurrent_writers_get_unique_increasing_ticks() {
        let h = Arc::new(harness(&[(1, 1024 * 1024)]));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| write(&h.slots, &document(&format!("{t}-{i}")), None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut infos: Vec<SlotInfo> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        infos.sort_by_key(|info| info.offset);
        for pair in infos.windows(2) {
            assert!(pair[0].tick < pair[1].tick);
        }
    }
}
