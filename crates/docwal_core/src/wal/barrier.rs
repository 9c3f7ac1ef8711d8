//! Logfile barriers.
//!
//! A barrier pins every logfile whose `tick_max` reaches its `min_tick`
//! until the barrier expires or is removed. Replication readers use barriers
//! to keep the logfiles they still need to tail.

use crate::types::{BarrierId, Tick};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// A retention barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogfileBarrier {
    /// Barrier id.
    pub id: BarrierId,
    /// Smallest tick the holder still needs.
    pub min_tick: Tick,
    /// When the barrier stops protecting logfiles.
    pub expires: Instant,
}

impl LogfileBarrier {
    /// Returns true once `now` is past the expiry time.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires <= now
    }
}

#[derive(Debug, Default)]
pub(crate) struct BarrierRegistry {
    barriers: RwLock<BTreeMap<BarrierId, LogfileBarrier>>,
}

impl BarrierRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, id: BarrierId, min_tick: Tick, ttl: Duration) {
        let barrier = LogfileBarrier {
            id,
            min_tick,
            expires: Instant::now() + ttl,
        };
        debug!(barrier = %id, min_tick = %min_tick, ttl_ms = ttl.as_millis() as u64, "adding logfile barrier");
        self.barriers.write().insert(id, barrier);
    }

    /// Refreshes the expiry time and raises `min_tick` when `tick` is
    /// larger. Returns false for an unknown id.
    pub(crate) fn extend(&self, id: BarrierId, ttl: Duration, tick: Tick) -> bool {
        let mut barriers = self.barriers.write();
        let Some(barrier) = barriers.get_mut(&id) else {
            return false;
        };
        barrier.expires = Instant::now() + ttl;
        if tick > barrier.min_tick {
            barrier.min_tick = tick;
        }
        debug!(barrier = %id, min_tick = %barrier.min_tick, "extended logfile barrier");
        true
    }

    pub(crate) fn remove(&self, id: BarrierId) -> bool {
        let removed = self.barriers.write().remove(&id).is_some();
        if removed {
            debug!(barrier = %id, "removed logfile barrier");
        }
        removed
    }

    pub(crate) fn list(&self) -> Vec<LogfileBarrier> {
        self.barriers.read().values().copied().collect()
    }

    /// Drops expired barriers and returns how many were dropped.
    pub(crate) fn collect_expired(&self) -> usize {
        let now = Instant::now();
        let mut barriers = self.barriers.write();
        let before = barriers.len();
        barriers.retain(|id, barrier| {
            let keep = !barrier.is_expired(now);
            if !keep {
                debug!(barrier = %id, "garbage-collecting expired logfile barrier");
            }
            keep
        });
        before - barriers.len()
    }

    /// Smallest `min_tick` over the live barriers, or `None` without any.
    pub(crate) fn min_tick(&self) -> Option<Tick> {
        let now = Instant::now();
        self.barriers
            .read()
            .values()
            .filter(|barrier| !barrier.is_expired(now))
            .map(|barrier| barrier.min_tick)
            .min()
    }

    /// Returns true if no live barrier needs a logfile ending at `tick_max`.
    pub(crate) fn allows_removal(&self, tick_max: Tick) -> bool {
        self.min_tick().map_or(true, |min| tick_max < min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn min_tick_over_live_barriers() {
        let registry = BarrierRegistry::new();
        assert_eq!(registry.min_tick(), None);

        registry.add(BarrierId::new(1), Tick::new(500), HOUR);
        registry.add(BarrierId::new(2), Tick::new(200), HOUR);
        registry.add(BarrierId::new(3), Tick::new(100), Duration::ZERO);

        assert_eq!(registry.min_tick(), Some(Tick::new(200)));
    }

    #[test]
    fn barrier_protects_logfiles_reaching_min_tick() {
        let registry = BarrierRegistry::new();
        assert!(registry.allows_removal(Tick::new(1000)));

        registry.add(BarrierId::new(1), Tick::new(300), HOUR);
        assert!(registry.allows_removal(Tick::new(299)));
        assert!(!registry.allows_removal(Tick::new(300)));
        assert!(!registry.allows_removal(Tick::new(900)));
    }

    #[test]
    fn extend_only_raises_min_tick() {
        let registry = BarrierRegistry::new();
        registry.add(BarrierId::new(1), Tick::new(300), Duration::ZERO);

        assert!(registry.extend(BarrierId::new(1), HOUR, Tick::new(100)));
        assert_eq!(registry.min_tick(), Some(Tick::new(300)));

        assert!(registry.extend(BarrierId::new(1), HOUR, Tick::new(400)));
        assert_eq!(registry.min_tick(), Some(Tick::new(400)));

        assert!(!registry.extend(BarrierId::new(9), HOUR, Tick::ZERO));
    }

    #[test]
    fn collect_expired_and_remove() {
        let registry = BarrierRegistry::new();
        registry.add(BarrierId::new(1), Tick::new(10), Duration::ZERO);
        registry.add(BarrierId::new(2), Tick::new(20), HOUR);

        assert_eq!(registry.collect_expired(), 1);
        assert_eq!(registry.list().len(), 1);
        assert!(registry.remove(BarrierId::new(2)));
        assert!(!registry.remove(BarrierId::new(2)));
        assert!(registry.list().is_empty());
    }
}
