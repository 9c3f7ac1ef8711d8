//! Write throttling driven by the collector backlog.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const THROTTLE_STEP: Duration = Duration::from_millis(10);

/// Tracks operations waiting for the collector and switches throttling on
/// and off.
///
/// Throttling switches on when the pending count rises to the threshold and
/// off when it falls below it. A threshold of zero disables throttling.
#[derive(Debug, Default)]
pub struct WriteThrottle {
    threshold: AtomicU64,
    pending: AtomicU64,
    active: AtomicBool,
}

impl WriteThrottle {
    /// Creates a throttle with the given threshold.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: AtomicU64::new(threshold),
            ..Self::default()
        }
    }

    /// Pending-operation threshold, zero when disabled.
    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::SeqCst)
    }

    /// Changes the threshold. Zero switches throttling off at once.
    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::SeqCst);
        if threshold == 0 {
            self.deactivate();
        }
    }

    /// Returns true while writers are throttled.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Operations currently waiting for the collector.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Adds queued operations. Returns true if this call switched
    /// throttling on.
    pub fn add_pending(&self, count: u64) -> bool {
        let pending = self.pending.fetch_add(count, Ordering::SeqCst) + count;
        let threshold = self.threshold();
        if threshold > 0 && pending >= threshold && !self.active.swap(true, Ordering::SeqCst) {
            info!(pending, threshold, "activating write throttling");
            return true;
        }
        false
    }

    /// Removes applied operations.
    pub fn sub_pending(&self, count: u64) {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(count))
            })
            .unwrap_or(0);
        let pending = previous.saturating_sub(count);
        let threshold = self.threshold();
        if threshold == 0 || pending < threshold {
            self.deactivate();
        }
    }

    fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!(pending = self.pending(), "deactivating write throttling");
        }
    }

    /// Blocks while throttling is active, polling in 10 ms steps.
    ///
    /// # Errors
    ///
    /// Returns `WriteThrottleTimeout` once `max_wait` has passed.
    pub fn wait(&self, max_wait: Duration) -> CoreResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let started = Instant::now();
        while self.is_active() {
            let waited = started.elapsed();
            if waited >= max_wait {
                warn!(waited_ms = waited.as_millis() as u64, "write throttling timed out");
                return Err(CoreError::WriteThrottleTimeout { waited });
            }
            std::thread::sleep(THROTTLE_STEP.min(max_wait - waited));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn activates_on_rising_crossing() {
        let throttle = WriteThrottle::new(10);
        assert!(!throttle.add_pending(9));
        assert!(!throttle.is_active());
        assert!(throttle.add_pending(1));
        assert!(throttle.is_active());
        // already active
        assert!(!throttle.add_pending(5));
    }

    #[test]
    fn deactivates_below_threshold() {
        let throttle = WriteThrottle::new(10);
        throttle.add_pending(12);
        throttle.sub_pending(2);
        assert!(throttle.is_active());
        throttle.sub_pending(1);
        assert!(!throttle.is_active());
        assert_eq!(throttle.pending(), 9);
    }

    #[test]
    fn zero_threshold_disables() {
        let throttle = WriteThrottle::new(0);
        throttle.add_pending(1_000_000);
        assert!(!throttle.is_active());

        throttle.set_threshold(5);
        throttle.add_pending(1);
        assert!(throttle.is_active());
        throttle.set_threshold(0);
        assert!(!throttle.is_active());
    }

    #[test]
    fn pending_never_underflows() {
        let throttle = WriteThrottle::new(0);
        throttle.add_pending(2);
        throttle.sub_pending(5);
        assert_eq!(throttle.pending(), 0);
    }

    #[test]
    fn wait_times_out_while_active() {
        let throttle = WriteThrottle::new(1);
        throttle.add_pending(1);
        let result = throttle.wait(Duration::from_millis(30));
        assert!(matches!(result, Err(CoreError::WriteThrottleTimeout { .. })));
    }

    #[test]
    fn wait_returns_once_deactivated() {
        let throttle = Arc::new(WriteThrottle::new(1));
        throttle.add_pending(1);
        let releaser = {
            let throttle = Arc::clone(&throttle);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                throttle.sub_pending(1);
            })
        };
        throttle.wait(Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
    }
}
