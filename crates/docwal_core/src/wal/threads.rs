//! Allocator, synchronizer and remover threads.
//!
//! Each thread holds an `Arc<LogfileManager>` and loops until its stop flag
//! is set, sleeping on its [`Signal`](crate::wal::inventory::Signal) between
//! rounds.

use crate::error::{CoreError, CoreResult};
use crate::wal::manager::LogfileManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

const ALLOCATOR_INTERVAL: Duration = Duration::from_millis(100);
const REMOVER_INTERVAL: Duration = Duration::from_secs(2);
const MAX_REMOVALS_PER_ROUND: usize = 5;

/// A named background thread with a stop flag.
#[derive(Debug)]
pub(crate) struct BackgroundThread {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundThread {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> CoreResult<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("docwal-{name}"))
            .spawn(move || body(flag))
            .map_err(|source| CoreError::ThreadStart {
                name: name.to_string(),
                source,
            })?;
        debug!(thread = name, "started WAL thread");
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(thread = self.name, "WAL thread panicked");
            }
        }
        debug!(thread = self.name, "stopped WAL thread");
    }
}

/// Keeps the configured number of empty logfiles ready and serves explicit
/// requests for larger ones.
pub(crate) fn run_allocator(manager: Arc<LogfileManager>, stop: Arc<AtomicBool>) {
    let inventory = manager.inventory();
    while !stop.load(Ordering::SeqCst) {
        if let Some(capacity) = inventory.take_allocation_request() {
            let capacity = capacity.max(manager.settings().logfile_size());
            if let Err(err) = manager.create_reserve_logfile(capacity) {
                report_allocation_error(&err);
                inventory.request_allocation(capacity);
            }
        }

        let reserve = manager.settings().reserve_logfiles();
        while (inventory.empty_count() as u64) < reserve && !stop.load(Ordering::SeqCst) {
            if let Err(err) = manager.create_reserve_logfile(manager.settings().logfile_size()) {
                report_allocation_error(&err);
                break;
            }
        }

        inventory.allocator.wait(ALLOCATOR_INTERVAL);
    }
}

fn report_allocation_error(err: &CoreError) {
    if err.is_filesystem_full() {
        warn!(error = %err, "cannot create logfile, filesystem full");
    } else {
        error!(error = %err, "cannot create logfile");
    }
}

/// Syncs committed bytes and seals logfiles once their last slot is durable.
pub(crate) fn run_synchronizer(manager: Arc<LogfileManager>, stop: Arc<AtomicBool>) {
    let inventory = manager.inventory();
    loop {
        // a final round after the stop request picks up the last footer
        let stopping = stop.load(Ordering::SeqCst);
        manager.sync_logfiles();
        if stopping {
            break;
        }
        inventory.synchronizer.wait(manager.settings().sync_interval());
    }
}

/// Drops expired barriers and deletes removable logfiles.
pub(crate) fn run_remover(manager: Arc<LogfileManager>, stop: Arc<AtomicBool>) {
    let inventory = manager.inventory();
    while !stop.load(Ordering::SeqCst) {
        let expired = manager.collect_logfile_barriers();
        if expired > 0 {
            trace!(expired, "collected expired logfile barriers");
        }
        for _ in 0..MAX_REMOVALS_PER_ROUND {
            let Some(logfile) = manager.take_removable_logfile() else {
                break;
            };
            manager.remove_logfile(&logfile);
        }
        inventory.remover.wait(REMOVER_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn background_thread_stops_on_join() {
        let thread = BackgroundThread::spawn("test", |stop| {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert_eq!(thread.name(), "test");
        thread.join();
    }
}
