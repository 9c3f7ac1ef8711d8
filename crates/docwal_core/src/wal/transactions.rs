//! Active and failed transaction bookkeeping.
//!
//! Transactions are sharded over 16 buckets, each behind its own `RwLock`,
//! so registering and unregistering rarely contend. An active transaction
//! remembers the last collected and last sealed logfile ids at the time it
//! started; those pin logfiles against collection and removal.

use crate::types::{LogfileId, TransactionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Number of lock shards.
pub const TRANSACTION_BUCKETS: usize = 16;

/// Logfile ids an active transaction pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionData {
    /// Last collected logfile when the transaction began.
    pub last_collected: LogfileId,
    /// Last sealed logfile when the transaction began. Zero for read-only
    /// transactions, which never hold back collection.
    pub last_sealed: LogfileId,
}

/// Aggregate over active transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunningTransactions {
    /// Number of active transactions.
    pub count: usize,
    /// Smallest non-zero last collected id, if any.
    pub min_last_collected: Option<LogfileId>,
    /// Smallest non-zero last sealed id, if any.
    pub min_last_sealed: Option<LogfileId>,
}

#[derive(Debug, Default)]
struct Bucket {
    active: HashMap<TransactionId, TransactionData>,
    /// Failed transaction -> newest logfile that may hold its markers.
    failed: HashMap<TransactionId, LogfileId>,
}

#[derive(Debug)]
pub(crate) struct TransactionRegistry {
    buckets: [RwLock<Bucket>; TRANSACTION_BUCKETS],
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| RwLock::new(Bucket::default())),
        }
    }
}

fn bucket_of(id: TransactionId) -> usize {
    (id.as_u64() % TRANSACTION_BUCKETS as u64) as usize
}

impl TransactionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: TransactionId, data: TransactionData) {
        self.buckets[bucket_of(id)].write().active.insert(id, data);
    }

    /// Removes an active transaction. A failed one moves to the failed set,
    /// remembered until `newest_logfile` is collected.
    pub(crate) fn unregister(&self, id: TransactionId, failed: Option<LogfileId>) {
        let mut bucket = self.buckets[bucket_of(id)].write();
        bucket.active.remove(&id);
        if let Some(logfile) = failed {
            bucket.failed.insert(id, logfile);
        }
    }

    /// Marks transactions found failed during recovery.
    pub(crate) fn add_failed(&self, ids: impl IntoIterator<Item = TransactionId>, logfile: LogfileId) {
        for id in ids {
            self.buckets[bucket_of(id)].write().failed.insert(id, logfile);
        }
    }

    /// Snapshot of all failed transaction ids.
    ///
    /// Read locks on every bucket are held together, so the snapshot is
    /// consistent across buckets.
    pub(crate) fn failed(&self) -> HashSet<TransactionId> {
        let guards: Vec<_> = self.buckets.iter().map(|bucket| bucket.read()).collect();
        guards
            .iter()
            .flat_map(|bucket| bucket.failed.keys().copied())
            .collect()
    }

    /// Forgets failed transactions whose markers all lie in collected
    /// logfiles. Returns how many were dropped.
    pub(crate) fn prune_failed(&self, last_collected: LogfileId) -> usize {
        let mut pruned = 0;
        for bucket in &self.buckets {
            let mut bucket = bucket.write();
            let before = bucket.failed.len();
            bucket.failed.retain(|_, logfile| *logfile > last_collected);
            pruned += before - bucket.failed.len();
        }
        pruned
    }

    pub(crate) fn running(&self) -> RunningTransactions {
        let mut result = RunningTransactions::default();
        for bucket in &self.buckets {
            let bucket = bucket.read();
            for data in bucket.active.values() {
                result.count += 1;
                result.min_last_collected =
                    min_non_zero(result.min_last_collected, data.last_collected);
                result.min_last_sealed = min_non_zero(result.min_last_sealed, data.last_sealed);
            }
        }
        result
    }
}

fn min_non_zero(current: Option<LogfileId>, value: LogfileId) -> Option<LogfileId> {
    if value.as_u64() == 0 {
        return current;
    }
    Some(current.map_or(value, |c| c.min(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(collected: u64, sealed: u64) -> TransactionData {
        TransactionData {
            last_collected: LogfileId::new(collected),
            last_sealed: LogfileId::new(sealed),
        }
    }

    #[test]
    fn running_skips_zero_ids() {
        let registry = TransactionRegistry::new();
        assert_eq!(registry.running(), RunningTransactions::default());

        registry.register(TransactionId::new(1), data(4, 7));
        registry.register(TransactionId::new(2), data(0, 0));
        registry.register(TransactionId::new(17), data(5, 6));

        let running = registry.running();
        assert_eq!(running.count, 3);
        assert_eq!(running.min_last_collected, Some(LogfileId::new(4)));
        assert_eq!(running.min_last_sealed, Some(LogfileId::new(6)));
    }

    #[test]
    fn unregister_failed_moves_to_failed_set() {
        let registry = TransactionRegistry::new();
        registry.register(TransactionId::new(3), data(1, 2));
        registry.register(TransactionId::new(4), data(1, 2));

        registry.unregister(TransactionId::new(3), Some(LogfileId::new(9)));
        registry.unregister(TransactionId::new(4), None);

        assert_eq!(registry.running().count, 0);
        let failed = registry.failed();
        assert!(failed.contains(&TransactionId::new(3)));
        assert!(!failed.contains(&TransactionId::new(4)));
    }

    #[test]
    fn prune_failed_after_collection() {
        let registry = TransactionRegistry::new();
        registry.add_failed([TransactionId::new(1), TransactionId::new(2)], LogfileId::new(5));
        registry.unregister(TransactionId::new(3), Some(LogfileId::new(8)));

        assert_eq!(registry.prune_failed(LogfileId::new(4)), 0);
        assert_eq!(registry.prune_failed(LogfileId::new(5)), 2);
        assert_eq!(registry.failed().len(), 1);
        assert_eq!(registry.prune_failed(LogfileId::new(8)), 1);
        assert!(registry.failed().is_empty());
    }

    #[test]
    fn concurrent_register_unregister() {
        use std::sync::Arc;
        let registry = Arc::new(TransactionRegistry::new());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let id = TransactionId::new(t * 1000 + i);
                        registry.register(id, data(1, 1));
                        registry.unregister(id, (i % 10 == 0).then_some(LogfileId::new(1)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.running().count, 0);
        assert_eq!(registry.failed().len(), 40);
    }
}
