//! The collector loop.

use crate::collector::queue::ApplyOutcome;
use crate::collector::scan::scan_logfile;
use crate::collector::{CollectorCache, DatafileStatisticsDelta, OperationKind};
use crate::engine::LocationKind;
use crate::error::CoreResult;
use crate::wal::logfile::{Logfile, LogfileStatus};
use crate::wal::manager::LogfileManager;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) fn run_collector(manager: Arc<LogfileManager>, stop: Arc<AtomicBool>) {
    let collector = Collector { manager: &manager };
    let inventory = manager.inventory();
    let mut backoff = MIN_BACKOFF;
    loop {
        let stopping = stop.load(Ordering::SeqCst);

        let mut worked = collector.collect_next();
        if collector.process_queued() > 0 {
            worked = true;
        }

        if stopping && manager.queue().is_empty() {
            break;
        }
        if worked {
            backoff = MIN_BACKOFF;
            continue;
        }
        if inventory.collector.wait(backoff) {
            backoff = MIN_BACKOFF;
        } else {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
    debug!("collector loop finished");
}

pub(crate) struct Collector<'a> {
    pub(crate) manager: &'a LogfileManager,
}

impl Collector<'_> {
    /// Claims and scans the next collectable logfile. Returns true if a
    /// logfile was processed.
    pub(crate) fn collect_next(&self) -> bool {
        let Some(logfile) = self.manager.collectable_logfile() else {
            return false;
        };
        if !logfile.transition(&[LogfileStatus::Sealed], LogfileStatus::CollectionRequested) {
            return false;
        }
        trace!(logfile = %logfile.id(), "collecting logfile");

        match self.collect_logfile(&logfile) {
            Ok(0) => {
                self.manager.stats().record_collector_pass();
                self.manager.set_collection_done(&logfile);
                true
            }
            Ok(queued) => {
                self.manager.stats().record_collector_pass();
                debug!(logfile = %logfile.id(), batches = queued, "queued collector batches");
                true
            }
            Err(err) => {
                self.manager.stats().record_collector_error();
                if err.is_filesystem_full() {
                    warn!(logfile = %logfile.id(), error = %err, "filesystem full while collecting, will retry");
                } else {
                    error!(logfile = %logfile.id(), error = %err, "collecting logfile failed, will retry");
                }
                logfile.set_status(LogfileStatus::Sealed);
                false
            }
        }
    }

    /// Scans `logfile` and transfers the survivors. Returns the number of
    /// queued batches.
    fn collect_logfile(&self, logfile: &Arc<Logfile>) -> CoreResult<u64> {
        let failed = self.manager.failed_transactions();
        let data = logfile.read_all()?;
        let batches = scan_logfile(logfile.id(), &data, &failed)?;
        let engine = self.manager.engine();

        let mut caches = Vec::with_capacity(batches.len());
        for batch in batches {
            let Some(collection) = engine.collection(batch.database_id, batch.collection_id) else {
                debug!(
                    database = %batch.database_id,
                    collection = %batch.collection_id,
                    "collection gone, skipping its markers"
                );
                continue;
            };
            let mut cache = CollectorCache::new(batch.database_id, batch.collection_id, logfile.id());
            cache.total_operations = batch.total_operations;
            engine.transfer_markers(&collection, &mut cache, &batch.markers)?;
            match cache.last_datafile {
                Some(datafile) => {
                    let delta = cache.stats_mut(datafile);
                    delta.dead_count += batch.dead_count;
                    delta.dead_bytes += batch.dead_bytes;
                }
                None if batch.dead_count > 0 => trace!(
                    collection = %batch.collection_id,
                    dead = batch.dead_count,
                    "nothing transferred, dead markers stay with the logfile"
                ),
                None => {}
            }
            if !cache.operations.is_empty() {
                caches.push(cache);
            }
        }

        let queued = caches.len() as u64;
        logfile.add_queued_caches(queued);
        for cache in caches {
            self.manager.queue_cache(cache);
        }
        Ok(queued)
    }

    /// Applies queued batches. Returns how many left the queue.
    pub(crate) fn process_queued(&self) -> usize {
        let done = self.manager.queue().process(|cache| self.apply(cache));
        for (cache, outcome) in &done {
            self.manager.throttle().sub_pending(cache.operations.len() as u64);
            if *outcome == ApplyOutcome::Vanished {
                debug!(collection = %cache.collection_id, "collection gone, dropping queued operations");
            }
            let Some(logfile) = self.manager.logfile(cache.logfile_id) else {
                continue;
            };
            if logfile.finish_queued_cache() == 0 {
                self.manager.set_collection_done(&logfile);
            }
        }
        done.len()
    }

    /// Repoints the index at transferred copies that are still current.
    fn apply(&self, cache: &CollectorCache) -> ApplyOutcome {
        let Some(collection) = self
            .manager
            .engine()
            .collection(cache.database_id, cache.collection_id)
        else {
            return ApplyOutcome::Vanished;
        };
        let locks = collection.locks();
        let Some(_compaction) = locks.compaction.try_read() else {
            trace!(collection = %cache.collection_id, "compaction running, retrying later");
            return ApplyOutcome::Busy;
        };
        let Some(_write) = locks.write.try_lock_for(WRITE_LOCK_TIMEOUT) else {
            trace!(collection = %cache.collection_id, "write lock busy, retrying later");
            return ApplyOutcome::Busy;
        };

        let index = collection.primary_index();
        let mut deltas: BTreeMap<_, DatafileStatisticsDelta> = cache.datafile_stats.clone();
        let mut alive = 0u64;
        let mut dead: u64 = deltas.values().map(|delta| delta.dead_count).sum();
        for operation in &cache.operations {
            let LocationKind::Datafile(datafile) = operation.datafile_location.kind else {
                continue;
            };
            let delta = deltas.entry(datafile).or_default();
            let size = u64::from(operation.size);
            match operation.kind {
                OperationKind::Document => {
                    if index.relocate_if(
                        &operation.key,
                        operation.revision,
                        operation.wal_location,
                        operation.datafile_location,
                    ) {
                        delta.alive_count += 1;
                        delta.alive_bytes += size;
                        alive += 1;
                    } else {
                        delta.dead_count += 1;
                        delta.dead_bytes += size;
                        dead += 1;
                    }
                }
                OperationKind::Remove => {
                    delta.deletions += 1;
                    delta.dead_count += 1;
                    delta.dead_bytes += size;
                    dead += 1;
                }
            }
        }
        collection.apply_datafile_statistics(&deltas);
        self.manager.stats().record_operations(alive, dead);
        debug!(
            collection = %cache.collection_id,
            logfile = %cache.logfile_id,
            alive,
            dead,
            total = cache.total_operations,
            "applied collector batch"
        );
        ApplyOutcome::Applied
    }
}
