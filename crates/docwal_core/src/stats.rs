//! WAL statistics.
//!
//! Counters are updated by writers and background threads and can be read at
//! any time. [`WalStats::snapshot`] returns a plain serializable copy.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// WAL counters.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct WalStats {
    markers_written: AtomicU64,
    bytes_written: AtomicU64,
    slots_abandoned: AtomicU64,
    logfiles_created: AtomicU64,
    logfiles_sealed: AtomicU64,
    logfiles_collected: AtomicU64,
    logfiles_removed: AtomicU64,
    syncs: AtomicU64,
    throttle_activations: AtomicU64,
    collector_passes: AtomicU64,
    collector_errors: AtomicU64,
    operations_applied: AtomicU64,
    operations_dead: AtomicU64,
}

impl WalStats {
    /// Creates a zeroed stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_marker(&self, bytes: u64) {
        self.markers_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned_slot(&self) {
        self.slots_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logfile_created(&self) {
        self.logfiles_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logfile_sealed(&self) {
        self.logfiles_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logfile_collected(&self) {
        self.logfiles_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logfile_removed(&self) {
        self.logfiles_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttle_activation(&self) {
        self.throttle_activations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collector_pass(&self) {
        self.collector_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collector_error(&self) {
        self.collector_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_operations(&self, alive: u64, dead: u64) {
        self.operations_applied.fetch_add(alive, Ordering::Relaxed);
        self.operations_dead.fetch_add(dead, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Markers finalized into logfiles, including headers and footers.
    pub fn markers_written(&self) -> u64 {
        self.markers_written.load(Ordering::Relaxed)
    }

    /// Bytes finalized into logfiles.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Slots dropped without being finalized.
    pub fn slots_abandoned(&self) -> u64 {
        self.slots_abandoned.load(Ordering::Relaxed)
    }

    /// Logfiles created by the allocator.
    pub fn logfiles_created(&self) -> u64 {
        self.logfiles_created.load(Ordering::Relaxed)
    }

    /// Logfiles that reached the sealed state.
    pub fn logfiles_sealed(&self) -> u64 {
        self.logfiles_sealed.load(Ordering::Relaxed)
    }

    /// Logfiles that reached the collected state.
    pub fn logfiles_collected(&self) -> u64 {
        self.logfiles_collected.load(Ordering::Relaxed)
    }

    /// Logfiles deleted by the remover.
    pub fn logfiles_removed(&self) -> u64 {
        self.logfiles_removed.load(Ordering::Relaxed)
    }

    /// Successful backend syncs.
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Number of times write throttling switched on.
    pub fn throttle_activations(&self) -> u64 {
        self.throttle_activations.load(Ordering::Relaxed)
    }

    /// Logfile scans completed by the collector.
    pub fn collector_passes(&self) -> u64 {
        self.collector_passes.load(Ordering::Relaxed)
    }

    /// Collector scans that failed and were retried.
    pub fn collector_errors(&self) -> u64 {
        self.collector_errors.load(Ordering::Relaxed)
    }

    /// Operations whose index entry now points at permanent storage.
    pub fn operations_applied(&self) -> u64 {
        self.operations_applied.load(Ordering::Relaxed)
    }

    /// Operations found superseded when applied.
    pub fn operations_dead(&self) -> u64 {
        self.operations_dead.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            markers_written: self.markers_written(),
            bytes_written: self.bytes_written(),
            slots_abandoned: self.slots_abandoned(),
            logfiles_created: self.logfiles_created(),
            logfiles_sealed: self.logfiles_sealed(),
            logfiles_collected: self.logfiles_collected(),
            logfiles_removed: self.logfiles_removed(),
            syncs: self.syncs(),
            throttle_activations: self.throttle_activations(),
            collector_passes: self.collector_passes(),
            collector_errors: self.collector_errors(),
            operations_applied: self.operations_applied(),
            operations_dead: self.operations_dead(),
        }
    }
}

/// A point-in-time copy of [`WalStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct WalStatsSnapshot {
    pub markers_written: u64,
    pub bytes_written: u64,
    pub slots_abandoned: u64,
    pub logfiles_created: u64,
    pub logfiles_sealed: u64,
    pub logfiles_collected: u64,
    pub logfiles_removed: u64,
    pub syncs: u64,
    pub throttle_activations: u64,
    pub collector_passes: u64,
    pub collector_errors: u64,
    pub operations_applied: u64,
    pub operations_dead: u64,
}
