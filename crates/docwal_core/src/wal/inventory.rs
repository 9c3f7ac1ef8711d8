//! Shared logfile inventory and thread signalling.

use crate::types::{LogfileId, Tick};
use crate::wal::logfile::{Logfile, LogfileStatus};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wakeup flag for one background thread.
///
/// A notification sent while the thread is busy is remembered, so the next
/// wait returns immediately.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_all();
    }

    /// Waits until notified or `timeout` passes. Returns whether a
    /// notification arrived.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.condvar.wait_for(&mut pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// Broadcast for foreground waiters polling a condition.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Progress {
    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    pub(crate) fn wait(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        let _ = self.condvar.wait_for(&mut guard, timeout);
    }
}

/// Ids of the newest logfile in each milestone state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogfileIds {
    /// Newest logfile that became the write target.
    pub last_opened: LogfileId,
    /// Newest logfile that was sealed.
    pub last_sealed: LogfileId,
    /// Newest logfile that was collected.
    pub last_collected: LogfileId,
}

/// The ordered set of logfiles plus the counters and signals shared by
/// the slot allocator, the manager and the background threads.
#[derive(Debug, Default)]
pub(crate) struct Inventory {
    logfiles: RwLock<BTreeMap<LogfileId, Arc<Logfile>>>,
    ids: Mutex<LogfileIds>,
    writes_allowed: AtomicBool,
    last_committed_tick: AtomicU64,
    last_synced_tick: AtomicU64,
    allocation_request: Mutex<Option<u64>>,

    pub(crate) allocator: Signal,
    pub(crate) synchronizer: Signal,
    pub(crate) collector: Signal,
    pub(crate) remover: Signal,

    pub(crate) logfile_created: Progress,
    pub(crate) synced: Progress,
    pub(crate) collected: Progress,
}

impl Inventory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, logfile: Arc<Logfile>) {
        self.logfiles.write().insert(logfile.id(), logfile);
    }

    pub(crate) fn get(&self, id: LogfileId) -> Option<Arc<Logfile>> {
        self.logfiles.read().get(&id).cloned()
    }

    /// Returns every logfile in id order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Logfile>> {
        self.logfiles.read().values().cloned().collect()
    }

    pub(crate) fn empty_count(&self) -> usize {
        self.logfiles
            .read()
            .values()
            .filter(|logfile| logfile.status() == LogfileStatus::Empty)
            .count()
    }

    /// Takes the oldest empty logfile able to hold `min_capacity` bytes.
    ///
    /// Older empty logfiles that are too small are unlinked and returned as
    /// the second element so the caller can delete their files. Handing out
    /// empty logfiles strictly in id order keeps logfile ids increasing in
    /// write order.
    pub(crate) fn take_empty(&self, min_capacity: u64) -> (Option<Arc<Logfile>>, Vec<Arc<Logfile>>) {
        let mut logfiles = self.logfiles.write();
        let mut discarded = Vec::new();
        let empty: Vec<LogfileId> = logfiles
            .values()
            .filter(|logfile| logfile.status() == LogfileStatus::Empty)
            .map(|logfile| logfile.id())
            .collect();

        for id in empty {
            let Some(logfile) = logfiles.get(&id).cloned() else {
                continue;
            };
            if logfile.capacity() >= min_capacity {
                return (Some(logfile), discarded);
            }
            logfiles.remove(&id);
            discarded.push(logfile);
        }
        (None, discarded)
    }

    /// Unlinks the oldest logfile accepted by `eligible`, but only while
    /// more than `keep` eligible logfiles exist.
    ///
    /// The check and the unlink happen under one write lock, so a reader
    /// registering with [`Logfile::acquire`] under the read lock either
    /// pins the logfile first or never sees it.
    pub(crate) fn take_removable<F>(&self, keep: u64, eligible: F) -> Option<Arc<Logfile>>
    where
        F: Fn(&Logfile) -> bool,
    {
        let mut logfiles = self.logfiles.write();
        let mut first = None;
        let mut count = 0u64;
        for logfile in logfiles.values() {
            if !eligible(logfile) {
                continue;
            }
            first.get_or_insert(logfile.id());
            count += 1;
            if count > keep {
                break;
            }
        }
        if count <= keep {
            return None;
        }
        first.and_then(|id| logfiles.remove(&id))
    }

    /// Runs `f` on every logfile under the read lock.
    pub(crate) fn for_each<F: FnMut(&Arc<Logfile>)>(&self, mut f: F) {
        for logfile in self.logfiles.read().values() {
            f(logfile);
        }
    }

    pub(crate) fn ids(&self) -> LogfileIds {
        *self.ids.lock()
    }

    pub(crate) fn set_last_opened(&self, id: LogfileId) {
        let mut ids = self.ids.lock();
        ids.last_opened = ids.last_opened.max(id);
    }

    pub(crate) fn set_last_sealed(&self, id: LogfileId) {
        let mut ids = self.ids.lock();
        ids.last_sealed = ids.last_sealed.max(id);
    }

    pub(crate) fn set_last_collected(&self, id: LogfileId) {
        let mut ids = self.ids.lock();
        ids.last_collected = ids.last_collected.max(id);
        ids.last_sealed = ids.last_sealed.max(ids.last_collected);
    }

    pub(crate) fn writes_allowed(&self) -> bool {
        self.writes_allowed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_writes_allowed(&self, allowed: bool) {
        self.writes_allowed.store(allowed, Ordering::SeqCst);
    }

    pub(crate) fn last_committed_tick(&self) -> Tick {
        Tick::new(self.last_committed_tick.load(Ordering::SeqCst))
    }

    pub(crate) fn update_committed_tick(&self, tick: Tick) {
        self.last_committed_tick
            .fetch_max(tick.as_u64(), Ordering::SeqCst);
    }

    pub(crate) fn last_synced_tick(&self) -> Tick {
        Tick::new(self.last_synced_tick.load(Ordering::SeqCst))
    }

    pub(crate) fn update_synced_tick(&self, tick: Tick) {
        self.last_synced_tick.fetch_max(tick.as_u64(), Ordering::SeqCst);
    }

    /// Asks the allocator thread for a logfile of at least `capacity` bytes.
    pub(crate) fn request_allocation(&self, capacity: u64) {
        {
            let mut request = self.allocation_request.lock();
            *request = Some(request.map_or(capacity, |current| current.max(capacity)));
        }
        self.allocator.notify();
    }

    pub(crate) fn take_allocation_request(&self) -> Option<u64> {
        self.allocation_request.lock().take()
    }

    /// Wakes every background thread and every foreground waiter.
    pub(crate) fn wake_all(&self) {
        self.allocator.notify();
        self.synchronizer.notify();
        self.collector.notify();
        self.remover.notify();
        self.logfile_created.notify_all();
        self.synced.notify_all();
        self.collected.notify_all();
    }
}
