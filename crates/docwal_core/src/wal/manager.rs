//! The logfile manager.
//!
//! [`LogfileManager`] owns the WAL directory, the logfile inventory, the
//! slot allocator and the background threads. It is created with
//! [`LogfileManager::open`] and shared as an `Arc` with every thread and
//! every dependent; there is no global instance.
//!
//! # Lifecycle
//!
//! ```rust,ignore
//! let manager = LogfileManager::open(WalConfig::new("wal"), engine)?;
//!
//! let info = manager.allocate_and_write(&marker, WriteOptions::for_collection(db, cid))?;
//! manager.flush(true, false, false)?;
//!
//! manager.shutdown()?;
//! ```

use crate::admin::{PropertiesUpdate, WalProperties};
use crate::collector::queue::OperationQueue;
use crate::collector::thread::run_collector;
use crate::collector::CollectorCache;
use crate::config::{
    duration_ms, validate_logfile_size, validate_sync_interval, LiveSettings, WalConfig,
};
use crate::dir::WalDirectory;
use crate::engine::StorageEngine;
use crate::error::{CoreError, CoreResult};
use crate::marker::WalMarker;
use crate::stats::WalStats;
use crate::types::{
    BarrierId, CollectionId, DatabaseId, LogfileId, Tick, TickClock, TransactionId,
};
use crate::wal::barrier::{BarrierRegistry, LogfileBarrier};
use crate::wal::inventory::{Inventory, LogfileIds};
use crate::wal::logfile::{Logfile, LogfileStatus};
use crate::wal::recovery::Recovery;
use crate::wal::shutdown::ShutdownInfo;
use crate::wal::slots::{SealOutcome, Slot, SlotInfo, Slots};
use crate::wal::threads::{run_allocator, run_remover, run_synchronizer, BackgroundThread};
use crate::wal::throttle::WriteThrottle;
use crate::wal::transactions::{RunningTransactions, TransactionData, TransactionRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Upper bound for `flush(.., wait_for_collector = true, ..)`.
const COLLECTOR_FLUSH_WAIT: Duration = Duration::from_secs(120);

/// How long shutdown gives the collector to catch up with sealed logfiles.
const COLLECTOR_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

const WAIT_POLL: Duration = Duration::from_millis(10);
const COLLECTOR_POLL: Duration = Duration::from_millis(50);

/// Options for [`LogfileManager::allocate_and_write`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Collection the marker belongs to. Emits a prologue when it differs
    /// from the previous marker's collection.
    pub context: Option<(DatabaseId, CollectionId)>,
    /// Block until the marker is on disk.
    pub wait_for_sync: bool,
}

impl WriteOptions {
    /// Options for a marker of `collection_id` in `database_id`.
    #[must_use]
    pub fn for_collection(database_id: DatabaseId, collection_id: CollectionId) -> Self {
        Self {
            context: Some((database_id, collection_id)),
            wait_for_sync: false,
        }
    }

    /// Sets whether the write waits for the synchronizer.
    #[must_use]
    pub fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }
}

/// One row of [`LogfileManager::ranges`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogfileRange {
    /// Logfile id.
    pub id: LogfileId,
    /// File name inside the WAL directory.
    pub file_name: String,
    /// Lifecycle state.
    pub status: LogfileStatus,
    /// Smallest tick in the logfile.
    pub tick_min: Tick,
    /// Largest tick in the logfile.
    pub tick_max: Tick,
}

/// Tick counters of the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalState {
    /// Newest tick handed to a marker.
    pub last_assigned_tick: Tick,
    /// Newest tick whose marker is committed.
    pub last_committed_tick: Tick,
    /// Newest tick whose marker is on disk.
    pub last_synced_tick: Tick,
    /// Markers written since open.
    pub num_events: u64,
}

/// Logfiles handed out by [`LogfileManager::logfiles_for_tick_range`].
///
/// Every logfile in `logfiles` has a registered user and must be handed
/// back through [`LogfileManager::return_logfiles`].
#[derive(Debug, Default)]
pub struct TickRangeLogfiles {
    /// Logfiles overlapping the requested range, in id order.
    pub logfiles: Vec<Arc<Logfile>>,
    /// Whether a logfile starting at or before the range minimum still
    /// exists, meaning no tick of the range was removed.
    pub min_tick_included: bool,
}

#[derive(Debug, Default)]
struct Threads {
    allocator: Option<BackgroundThread>,
    synchronizer: Option<BackgroundThread>,
    collector: Option<BackgroundThread>,
    remover: Option<BackgroundThread>,
}

/// Orchestrates logfiles, transactions, barriers and the WAL threads.
pub struct LogfileManager {
    config: WalConfig,
    directory: WalDirectory,
    settings: Arc<LiveSettings>,
    clock: Arc<TickClock>,
    stats: Arc<WalStats>,
    inventory: Arc<Inventory>,
    slots: Slots,
    barriers: BarrierRegistry,
    transactions: TransactionRegistry,
    throttle: WriteThrottle,
    queue: OperationQueue,
    engine: Arc<dyn StorageEngine>,
    dropped_collections: HashSet<(DatabaseId, CollectionId)>,
    dropped_databases: HashSet<DatabaseId>,
    shutdown_file_lock: Mutex<()>,
    shutting_down: AtomicBool,
    stopped: AtomicBool,
    collector_running: AtomicBool,
    threads: Mutex<Threads>,
}

impl fmt::Debug for LogfileManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogfileManager")
            .field("directory", &self.directory.path())
            .field("ids", &self.inventory.ids())
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LogfileManager {
    /// Opens the WAL in `config.directory`.
    ///
    /// Locks the directory, reads the shutdown file, inspects and replays
    /// existing logfiles into `engine`, seals logfiles the previous run left
    /// open, starts the allocator and synchronizer, allows writes, writes
    /// the shutdown file and finally starts the collector and remover.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directory is
    /// locked, recovery fails or a thread cannot be started.
    pub fn open(config: WalConfig, engine: Arc<dyn StorageEngine>) -> CoreResult<Arc<Self>> {
        config.validate()?;
        let directory = WalDirectory::open(&config.directory)?;
        let shutdown = ShutdownInfo::read(&directory.shutdown_path())?;
        let clock = Arc::new(TickClock::new(Tick::ZERO));

        let recovered =
            Recovery::new(&config, &directory, &clock, engine.as_ref(), shutdown).run()?;

        let settings = Arc::new(LiveSettings::from_config(&config));
        let stats = Arc::new(WalStats::new());
        let inventory = Arc::new(Inventory::new());
        for logfile in recovered.logfiles {
            inventory.insert(logfile);
        }
        inventory.set_last_opened(recovered.ids.last_opened);
        inventory.set_last_sealed(recovered.ids.last_sealed);
        inventory.set_last_collected(recovered.ids.last_collected);

        let transactions = TransactionRegistry::new();
        transactions.add_failed(
            recovered.failed_transactions.iter().copied(),
            recovered.ids.last_opened,
        );

        let slots = Slots::new(
            Arc::clone(&inventory),
            Arc::clone(&clock),
            Arc::clone(&settings),
            Arc::clone(&stats),
            config.reserve_space,
            config.flush_timeout,
        );

        let manager = Arc::new(Self {
            throttle: WriteThrottle::new(config.throttle_when_pending),
            config,
            directory,
            settings,
            clock,
            stats,
            inventory,
            slots,
            barriers: BarrierRegistry::new(),
            transactions,
            queue: OperationQueue::new(),
            engine,
            dropped_collections: recovered.dropped_collections,
            dropped_databases: recovered.dropped_databases,
            shutdown_file_lock: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            collector_running: AtomicBool::new(false),
            threads: Mutex::new(Threads::default()),
        });

        if let Err(err) = manager.start() {
            error!(error = %err, "could not start WAL");
            manager.begin_shutdown();
            manager.stop_threads();
            return Err(err);
        }

        let ids = manager.ids();
        info!(
            directory = %manager.directory.path().display(),
            tick = %manager.clock.current(),
            last_sealed = %ids.last_sealed,
            last_collected = %ids.last_collected,
            replayed = recovered.replayed,
            "WAL opened"
        );
        Ok(manager)
    }

    fn start(self: &Arc<Self>) -> CoreResult<()> {
        let allocator = self.spawn_thread("allocator", run_allocator)?;
        self.threads.lock().allocator = Some(allocator);
        let synchronizer = self.spawn_thread("synchronizer", run_synchronizer)?;
        self.threads.lock().synchronizer = Some(synchronizer);

        self.inventory.set_writes_allowed(true);
        self.write_shutdown_info(false)?;

        let collector = self.spawn_thread("collector", run_collector)?;
        self.collector_running.store(true, Ordering::SeqCst);
        self.threads.lock().collector = Some(collector);
        let remover = self.spawn_thread("remover", run_remover)?;
        self.threads.lock().remover = Some(remover);
        Ok(())
    }

    fn spawn_thread(
        self: &Arc<Self>,
        name: &'static str,
        body: fn(Arc<LogfileManager>, Arc<AtomicBool>),
    ) -> CoreResult<BackgroundThread> {
        let manager = Arc::clone(self);
        BackgroundThread::spawn(name, move |stop| body(manager, stop))
    }

    // --- writes ---

    /// Reserves a slot of `size` bytes without collection context.
    ///
    /// # Errors
    ///
    /// See [`LogfileManager::allocate_for`].
    pub fn allocate(&self, size: u32) -> CoreResult<Slot> {
        self.slots.allocate(size, None)
    }

    /// Reserves a slot of `size` bytes for a marker of the given collection.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` during recovery and shutdown, `DocumentTooLarge`
    /// for sizes the WAL does not accept, and `NoWritableLogfile` when the
    /// allocator did not provide a logfile within the flush timeout.
    pub fn allocate_for(
        &self,
        database_id: DatabaseId,
        collection_id: CollectionId,
        size: u32,
    ) -> CoreResult<Slot> {
        self.slots.allocate(size, Some((database_id, collection_id)))
    }

    /// Publishes a written slot, optionally waiting until it is synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot was never written or the sync wait
    /// timed out.
    pub fn finalize(&self, slot: Slot, wait_for_sync: bool) -> CoreResult<SlotInfo> {
        self.slots.finalize(slot, wait_for_sync)
    }

    /// Throttle check, allocation, encoding and finalization in one call.
    ///
    /// # Errors
    ///
    /// Returns `WriteThrottleTimeout` if throttling outlasts the configured
    /// wait, or any allocation error.
    pub fn allocate_and_write(
        &self,
        marker: &WalMarker,
        options: WriteOptions,
    ) -> CoreResult<SlotInfo> {
        self.throttle.wait(self.settings.throttle_wait())?;

        let encoded = marker.encoded_len();
        let size = u32::try_from(encoded).map_err(|_| CoreError::DocumentTooLarge {
            size: encoded as u64,
            max: u64::from(u32::MAX),
        })?;
        let mut slot = self.slots.allocate(size, options.context)?;
        slot.write(marker)?;
        self.slots.finalize(slot, options.wait_for_sync)
    }

    // --- flushing and waiting ---

    /// Seals the open logfile and waits as requested.
    ///
    /// Succeeds immediately when nothing was written since the last seal.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if a requested wait did not finish in time, or
    /// an error from writing the shutdown file.
    pub fn flush(
        &self,
        wait_for_sync: bool,
        wait_for_collector: bool,
        write_shutdown_file: bool,
    ) -> CoreResult<()> {
        let sealed = match self.slots.seal_current()? {
            SealOutcome::Sealed(id) => Some(id),
            SealOutcome::Unused(id) => {
                trace!(logfile = %id, "current logfile is unused, nothing to flush");
                None
            }
            SealOutcome::NothingOpen => None,
        };
        debug!(
            logfile = ?sealed,
            wait_for_sync,
            wait_for_collector,
            "flush requested"
        );

        if let Some(id) = sealed {
            if wait_for_sync || wait_for_collector {
                self.wait_for_sealed(id, self.config.flush_timeout)?;
            }
            if wait_for_collector {
                self.wait_for_collector(id, COLLECTOR_FLUSH_WAIT)?;
            }
        }

        if write_shutdown_file {
            self.write_shutdown_info(false)?;
        }
        Ok(())
    }

    fn wait_for_sealed(&self, id: LogfileId, max_wait: Duration) -> CoreResult<()> {
        let started = Instant::now();
        while self.inventory.ids().last_sealed < id {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(CoreError::lock_timeout(
                    format!("waiting for logfile {id} to be sealed"),
                    waited,
                ));
            }
            self.inventory.synchronizer.notify();
            self.inventory.synced.wait(WAIT_POLL);
        }
        Ok(())
    }

    /// Waits until every marker handed out so far is on disk.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` after `max_wait`.
    pub fn wait_for_sync(&self, max_wait: Duration) -> CoreResult<()> {
        let target = self.slots.last_assigned_tick();
        let started = Instant::now();
        while self.inventory.last_synced_tick() < target {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(CoreError::lock_timeout(
                    format!("waiting for sync of {target}"),
                    waited,
                ));
            }
            self.inventory.synchronizer.notify();
            self.inventory.synced.wait(WAIT_POLL);
        }
        Ok(())
    }

    /// Waits until logfile `id` is collected.
    ///
    /// Returns at once when the collector is not running.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` after `max_wait`.
    pub fn wait_for_collector(&self, id: LogfileId, max_wait: Duration) -> CoreResult<()> {
        let started = Instant::now();
        loop {
            if self.inventory.ids().last_collected >= id {
                return Ok(());
            }
            if !self.collector_running.load(Ordering::SeqCst) {
                debug!(logfile = %id, "collector not running, not waiting");
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= max_wait {
                self.log_status();
                return Err(CoreError::lock_timeout(
                    format!("waiting for collector to reach logfile {id}"),
                    waited,
                ));
            }
            self.inventory.collector.notify();
            self.inventory.collected.wait(COLLECTOR_POLL);
        }
    }

    /// Waits until no operations of `collection_id` are queued.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` after `timeout`.
    pub fn wait_for_collector_queue(
        &self,
        collection_id: CollectionId,
        timeout: Duration,
    ) -> CoreResult<()> {
        let started = Instant::now();
        while self.queue.has_queued(collection_id) {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoreError::lock_timeout(
                    format!("waiting for collector queue of {collection_id}"),
                    waited,
                ));
            }
            self.inventory.collector.notify();
            self.inventory.collected.wait(WAIT_POLL);
        }
        Ok(())
    }

    // --- transactions ---

    /// Registers a running transaction.
    ///
    /// A write transaction pins the current last sealed logfile against
    /// collection; a read-only one only pins collected logfiles against
    /// removal.
    pub fn register_transaction(&self, id: TransactionId, read_only: bool) {
        let ids = self.inventory.ids();
        let data = TransactionData {
            last_collected: ids.last_collected,
            last_sealed: if read_only {
                LogfileId::default()
            } else {
                ids.last_sealed
            },
        };
        trace!(transaction = %id, read_only, "registered transaction");
        self.transactions.register(id, data);
    }

    /// Unregisters a transaction. A failed one is remembered so the collector
    /// ignores its markers until every logfile that may hold them is
    /// collected.
    pub fn unregister_transaction(&self, id: TransactionId, failed: bool) {
        let newest = failed.then(|| self.inventory.ids().last_opened);
        self.transactions.unregister(id, newest);
        trace!(transaction = %id, failed, "unregistered transaction");
        self.inventory.collector.notify();
    }

    /// Consistent snapshot of failed transaction ids.
    pub fn failed_transactions(&self) -> HashSet<TransactionId> {
        self.transactions.failed()
    }

    /// Count of running transactions and the logfile ids they pin.
    pub fn running_transactions(&self) -> RunningTransactions {
        self.transactions.running()
    }

    /// Forgets failed transactions whose markers are all collected.
    pub fn prune_failed_transactions(&self, last_collected: LogfileId) -> usize {
        self.transactions.prune_failed(last_collected)
    }

    // --- barriers ---

    /// Keeps logfiles holding ticks at or above `min_tick` for `ttl`.
    pub fn add_logfile_barrier(&self, min_tick: Tick, ttl: Duration) -> BarrierId {
        let id = BarrierId::new(self.clock.next().as_u64());
        self.barriers.add(id, min_tick, ttl);
        debug!(barrier = %id, min_tick = %min_tick, ?ttl, "added logfile barrier");
        id
    }

    /// Renews a barrier and raises its minimum tick to `tick` if higher.
    /// Returns false for an unknown barrier.
    pub fn extend_logfile_barrier(&self, id: BarrierId, ttl: Duration, tick: Tick) -> bool {
        self.barriers.extend(id, ttl, tick)
    }

    /// Removes a barrier. Returns false for an unknown barrier.
    pub fn remove_logfile_barrier(&self, id: BarrierId) -> bool {
        let removed = self.barriers.remove(id);
        if removed {
            debug!(barrier = %id, "removed logfile barrier");
            self.inventory.remover.notify();
        }
        removed
    }

    /// Lists live and expired-but-not-yet-collected barriers.
    pub fn logfile_barriers(&self) -> Vec<LogfileBarrier> {
        self.barriers.list()
    }

    /// Drops expired barriers. Returns how many were dropped.
    pub fn collect_logfile_barriers(&self) -> usize {
        self.barriers.collect_expired()
    }

    /// Lowest minimum tick over live barriers.
    pub fn min_barrier_tick(&self) -> Option<Tick> {
        self.barriers.min_tick()
    }

    // --- throttling ---

    /// Pending collector operations that activate throttling (0 = off).
    pub fn throttle_when_pending(&self) -> u64 {
        self.throttle.threshold()
    }

    /// Changes the throttling threshold.
    pub fn set_throttle_when_pending(&self, threshold: u64) {
        self.throttle.set_threshold(threshold);
    }

    /// Whether writers are currently throttled.
    pub fn is_throttled(&self) -> bool {
        self.throttle.is_active()
    }

    /// The write throttle.
    pub fn throttle(&self) -> &WriteThrottle {
        &self.throttle
    }

    // --- properties ---

    /// Current runtime properties.
    pub fn properties(&self) -> WalProperties {
        WalProperties {
            allow_oversize_entries: self.settings.allow_oversize_entries(),
            logfile_size: self.settings.logfile_size(),
            historic_logfiles: self.settings.historic_logfiles(),
            reserve_logfiles: self.settings.reserve_logfiles(),
            throttle_wait: duration_ms(self.settings.throttle_wait()),
            throttle_when_pending: self.throttle.threshold(),
            sync_interval: duration_ms(self.settings.sync_interval()),
        }
    }

    /// Applies a partial properties update. Nothing changes if any value is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the rejected value.
    pub fn update_properties(&self, update: &PropertiesUpdate) -> CoreResult<WalProperties> {
        if let Some(size) = update.logfile_size {
            validate_logfile_size(size)?;
            if self.config.reserve_space >= size / 2 {
                return Err(CoreError::invalid_config(format!(
                    "logfile size {size} too small for reserve space {}",
                    self.config.reserve_space
                )));
            }
        }
        if let Some(ms) = update.sync_interval {
            validate_sync_interval(Duration::from_millis(ms))?;
        }

        if let Some(value) = update.allow_oversize_entries {
            self.settings.set_allow_oversize_entries(value);
        }
        if let Some(size) = update.logfile_size {
            self.settings.set_logfile_size(size);
        }
        if let Some(count) = update.historic_logfiles {
            self.settings.set_historic_logfiles(count);
            self.inventory.remover.notify();
        }
        if let Some(count) = update.reserve_logfiles {
            self.settings.set_reserve_logfiles(count);
            self.inventory.allocator.notify();
        }
        if let Some(ms) = update.throttle_wait {
            self.settings.set_throttle_wait(Duration::from_millis(ms));
        }
        if let Some(threshold) = update.throttle_when_pending {
            self.throttle.set_threshold(threshold);
        }
        if let Some(ms) = update.sync_interval {
            self.settings.set_sync_interval(Duration::from_millis(ms));
        }

        let properties = self.properties();
        info!(?properties, "updated WAL properties");
        Ok(properties)
    }

    // --- introspection ---

    /// The configuration the manager was opened with.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Runtime-adjustable settings.
    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    /// WAL counters.
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Milestone logfile ids.
    pub fn ids(&self) -> LogfileIds {
        self.inventory.ids()
    }

    /// Last tick handed out by the clock.
    pub fn current_tick(&self) -> Tick {
        self.clock.current()
    }

    /// Looks up a logfile.
    pub fn logfile(&self, id: LogfileId) -> Option<Arc<Logfile>> {
        self.inventory.get(id)
    }

    /// All known logfiles in id order.
    pub fn logfiles(&self) -> Vec<Arc<Logfile>> {
        self.inventory.snapshot()
    }

    /// The storage engine the collector transfers into.
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Lists every non-empty logfile with its tick range.
    pub fn ranges(&self) -> Vec<LogfileRange> {
        self.inventory
            .snapshot()
            .into_iter()
            .filter(|logfile| logfile.status() != LogfileStatus::Empty)
            .map(|logfile| LogfileRange {
                id: logfile.id(),
                file_name: logfile.id().file_name(),
                status: logfile.status(),
                tick_min: logfile.tick_min(),
                tick_max: logfile.tick_max(),
            })
            .collect()
    }

    /// Tick counters.
    pub fn state(&self) -> WalState {
        WalState {
            last_assigned_tick: self.slots.last_assigned_tick(),
            last_committed_tick: self.inventory.last_committed_tick(),
            last_synced_tick: self.inventory.last_synced_tick(),
            num_events: self.stats.markers_written(),
        }
    }

    /// Logs the state of every logfile at debug level.
    pub fn log_status(&self) {
        let ids = self.inventory.ids();
        debug!(
            last_opened = %ids.last_opened,
            last_sealed = %ids.last_sealed,
            last_collected = %ids.last_collected,
            queued = self.queue.len(),
            pending = self.throttle.pending(),
            "WAL status"
        );
        self.inventory.for_each(|logfile| {
            debug!(
                logfile = %logfile.id(),
                status = %logfile.status(),
                users = logfile.users(),
                queued_caches = logfile.queued_caches(),
                tick_min = %logfile.tick_min(),
                tick_max = %logfile.tick_max(),
                "logfile status"
            );
        });
    }

    /// Returns the logfiles overlapping `[min, max]` and registers a user on
    /// each, so they are not removed while being read.
    pub fn logfiles_for_tick_range(&self, min: Tick, max: Tick) -> TickRangeLogfiles {
        let mut candidates = Vec::new();
        self.inventory.for_each(|logfile| {
            if logfile.status() != LogfileStatus::Empty {
                logfile.acquire();
                candidates.push(Arc::clone(logfile));
            }
        });

        let mut result = TickRangeLogfiles::default();
        for logfile in candidates {
            let (tick_min, tick_max) = (logfile.tick_min(), logfile.tick_max());
            if tick_min != Tick::ZERO && tick_min <= min {
                result.min_tick_included = true;
            }
            if min > tick_max || max < tick_min {
                logfile.release();
                continue;
            }
            result.logfiles.push(logfile);
        }
        result
    }

    /// Releases logfiles obtained from
    /// [`LogfileManager::logfiles_for_tick_range`].
    pub fn return_logfiles(&self, logfiles: &[Arc<Logfile>]) {
        for logfile in logfiles {
            logfile.release();
        }
        self.inventory.remover.notify();
    }

    /// Collections whose drop marker was found during recovery.
    pub fn dropped_collections(&self) -> &HashSet<(DatabaseId, CollectionId)> {
        &self.dropped_collections
    }

    /// Databases whose drop marker was found during recovery.
    pub fn dropped_databases(&self) -> &HashSet<DatabaseId> {
        &self.dropped_databases
    }

    /// Runs `callback` while no collector operations are queued. Returns
    /// false if operations were queued.
    pub fn execute_while_nothing_queued<F: FnOnce()>(&self, callback: F) -> bool {
        self.queue.execute_while_empty(callback)
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // --- shutdown ---

    /// Disables throttling, stops accepting writes and wakes every waiter.
    pub fn begin_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("WAL shutdown requested");
        self.throttle.set_threshold(0);
        self.inventory.set_writes_allowed(false);
        self.inventory.wake_all();
    }

    /// Seals the open logfile, lets the collector catch up for a bounded
    /// time, stops every thread and writes the shutdown file with the
    /// shutdown time.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error of the final seal or of writing the shutdown
    /// file. Threads are stopped either way.
    pub fn shutdown(&self) -> CoreResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.begin_shutdown();

        let allocator = self.threads.lock().allocator.take();
        if let Some(thread) = allocator {
            self.join_thread(thread);
        }

        let mut result = self.final_seal();
        if let Err(err) = &result {
            warn!(error = %err, "final seal failed");
        }
        self.wait_for_collector_to_catch_up();
        self.stop_threads();

        if let Err(err) = self.write_shutdown_info(true) {
            error!(error = %err, "cannot write shutdown file");
            if result.is_ok() {
                result = Err(err);
            }
        }
        info!(tick = %self.clock.current(), "WAL shut down");
        result
    }

    fn final_seal(&self) -> CoreResult<()> {
        match self.slots.seal_current()? {
            SealOutcome::Sealed(id) => self.wait_for_sealed(id, self.config.flush_timeout),
            SealOutcome::Unused(_) | SealOutcome::NothingOpen => Ok(()),
        }
    }

    fn wait_for_collector_to_catch_up(&self) {
        if !self.collector_running.load(Ordering::SeqCst) {
            return;
        }
        let started = Instant::now();
        loop {
            let ids = self.inventory.ids();
            if ids.last_collected >= ids.last_sealed {
                return;
            }
            if started.elapsed() >= COLLECTOR_SHUTDOWN_WAIT {
                debug!(
                    last_sealed = %ids.last_sealed,
                    last_collected = %ids.last_collected,
                    "collector did not catch up before shutdown"
                );
                return;
            }
            self.inventory.collector.notify();
            self.inventory.collected.wait(COLLECTOR_POLL);
        }
    }

    /// Stops the remaining threads. The synchronizer goes last so its final
    /// round sees every footer.
    fn stop_threads(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in [
            threads.allocator,
            threads.remover,
            threads.collector,
            threads.synchronizer,
        ]
        .into_iter()
        .flatten()
        {
            self.join_thread(thread);
        }
        self.collector_running.store(false, Ordering::SeqCst);
    }

    fn join_thread(&self, thread: BackgroundThread) {
        thread.request_stop();
        self.inventory.wake_all();
        trace!(thread = thread.name(), "joining WAL thread");
        thread.join();
    }

    // --- background thread hooks ---

    pub(crate) fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub(crate) fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Creates an empty logfile of `capacity` bytes for the reserve.
    pub(crate) fn create_reserve_logfile(&self, capacity: u64) -> CoreResult<LogfileId> {
        let id = LogfileId::new(self.clock.next().as_u64());
        let path = self.directory.logfile_path(id);
        let logfile = Logfile::create(id, &path, capacity)?;
        self.inventory.insert(Arc::new(logfile));
        self.stats.record_logfile_created();
        trace!(logfile = %id, capacity, "created reserve logfile");
        self.inventory.logfile_created.notify_all();
        Ok(id)
    }

    /// One synchronizer round.
    pub(crate) fn sync_logfiles(&self) {
        for logfile in self.inventory.snapshot() {
            let status = logfile.status();
            if !matches!(status, LogfileStatus::Open | LogfileStatus::SealRequested) {
                continue;
            }
            if logfile.needs_sync() {
                match logfile.sync() {
                    Ok(Some(tick)) => {
                        self.inventory.update_synced_tick(tick);
                        self.stats.record_sync();
                    }
                    Ok(None) => {}
                    Err(err) => {
                        if err.is_filesystem_full() {
                            warn!(logfile = %logfile.id(), error = %err, "filesystem full while syncing logfile");
                        } else {
                            error!(logfile = %logfile.id(), error = %err, "syncing logfile failed");
                        }
                        continue;
                    }
                }
            }
            if status == LogfileStatus::SealRequested
                && logfile.is_fully_synced()
                && logfile.transition(&[LogfileStatus::SealRequested], LogfileStatus::Sealed)
            {
                self.inventory.set_last_sealed(logfile.id());
                self.stats.record_logfile_sealed();
                debug!(logfile = %logfile.id(), tick_max = %logfile.tick_max(), "sealed logfile");
                self.inventory.collector.notify();
            }
        }
        self.inventory.synced.notify_all();
    }

    /// Oldest logfile the collector may claim, in strict id order.
    pub(crate) fn collectable_logfile(&self) -> Option<Arc<Logfile>> {
        let limit = self
            .transactions
            .running()
            .min_last_sealed
            .unwrap_or(LogfileId::new(u64::MAX));
        for logfile in self.inventory.snapshot() {
            if logfile.id() > limit {
                break;
            }
            match logfile.status() {
                LogfileStatus::Sealed => return Some(logfile),
                LogfileStatus::Collected | LogfileStatus::Empty => {}
                LogfileStatus::Open
                | LogfileStatus::SealRequested
                | LogfileStatus::CollectionRequested => return None,
            }
        }
        None
    }

    pub(crate) fn queue_cache(&self, cache: CollectorCache) {
        if self.throttle.add_pending(cache.operations.len() as u64) {
            self.stats.record_throttle_activation();
        }
        self.queue.push(cache);
    }

    /// Marks `logfile` collected and publishes the new milestone.
    pub(crate) fn set_collection_done(&self, logfile: &Arc<Logfile>) {
        logfile.set_status(LogfileStatus::Collected);
        self.inventory.set_last_collected(logfile.id());
        self.stats.record_logfile_collected();
        let pruned = self
            .transactions
            .prune_failed(self.inventory.ids().last_collected);
        debug!(
            logfile = %logfile.id(),
            pruned_failed_transactions = pruned,
            "collected logfile"
        );
        self.inventory.collected.notify_all();
        self.inventory.remover.notify();
        if let Err(err) = self.write_shutdown_info(false) {
            error!(error = %err, "cannot write shutdown file");
        }
    }

    /// Unlinks the oldest removable logfile from the inventory.
    pub(crate) fn take_removable_logfile(&self) -> Option<Arc<Logfile>> {
        let pinned = self.transactions.running().min_last_collected;
        self.inventory
            .take_removable(self.settings.historic_logfiles(), |logfile| {
                logfile.status() == LogfileStatus::Collected
                    && logfile.can_be_removed()
                    && pinned.map_or(true, |id| logfile.id() <= id)
                    && self.barriers.allows_removal(logfile.tick_max())
            })
    }

    /// Deletes an unlinked logfile, relinking it if deletion fails.
    pub(crate) fn remove_logfile(&self, logfile: &Arc<Logfile>) {
        match self.directory.remove_logfile(logfile.id()) {
            Ok(()) => {
                self.stats.record_logfile_removed();
                debug!(logfile = %logfile.id(), "removed logfile");
            }
            Err(err) => {
                error!(logfile = %logfile.id(), error = %err, "cannot remove logfile");
                self.inventory.insert(Arc::clone(logfile));
            }
        }
    }

    fn write_shutdown_info(&self, with_time: bool) -> CoreResult<()> {
        let _guard = self.shutdown_file_lock.lock();
        let ids = self.inventory.ids();
        let mut info = ShutdownInfo {
            tick: self.clock.current(),
            last_collected: ids.last_collected,
            last_sealed: ids.last_sealed,
            shutdown_time: None,
        };
        if with_time {
            info = info.with_shutdown_time();
        }
        self.directory.write_shutdown_file(&info.to_json()?)?;
        trace!(tick = %info.tick, last_collected = %info.last_collected, "wrote shutdown file");
        Ok(())
    }
}
