//! Per-collection queue of transferred batches waiting for the second
//! collector phase.

use crate::collector::CollectorCache;
use crate::types::CollectionId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Result of trying to apply one queued batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    /// The batch was applied.
    Applied,
    /// A lock was not available; the batch stays queued.
    Busy,
    /// The collection or database is gone; the batch is discarded.
    Vanished,
}

#[derive(Debug, Default)]
struct QueueState {
    queues: BTreeMap<CollectionId, VecDeque<CollectorCache>>,
    /// Set while batches are taken out for processing.
    in_use: bool,
}

#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    state: Mutex<QueueState>,
}

impl OperationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, cache: CollectorCache) {
        self.state
            .lock()
            .queues
            .entry(cache.collection_id)
            .or_default()
            .push_back(cache);
    }

    pub(crate) fn is_empty(&self) -> bool {
        let state = self.state.lock();
        !state.in_use && state.queues.values().all(VecDeque::is_empty)
    }

    pub(crate) fn has_queued(&self, collection_id: CollectionId) -> bool {
        let state = self.state.lock();
        state.in_use || state.queues.get(&collection_id).is_some_and(|q| !q.is_empty())
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().queues.values().map(VecDeque::len).sum()
    }

    /// Offers the oldest batch of every collection to `apply`.
    ///
    /// Batches are taken out under the lock and applied without it. Busy
    /// batches go back to the front of their queue. Returns the batches
    /// that were applied or discarded.
    pub(crate) fn process<F>(&self, mut apply: F) -> Vec<(CollectorCache, ApplyOutcome)>
    where
        F: FnMut(&CollectorCache) -> ApplyOutcome,
    {
        let taken: Vec<CollectorCache> = {
            let mut state = self.state.lock();
            if state.in_use {
                return Vec::new();
            }
            let taken: Vec<_> = state
                .queues
                .values_mut()
                .filter_map(VecDeque::pop_front)
                .collect();
            state.in_use = !taken.is_empty();
            taken
        };
        if taken.is_empty() {
            return Vec::new();
        }

        let mut done = Vec::new();
        let mut busy = Vec::new();
        for cache in taken {
            match apply(&cache) {
                ApplyOutcome::Busy => busy.push(cache),
                outcome => done.push((cache, outcome)),
            }
        }

        let mut state = self.state.lock();
        for cache in busy {
            state
                .queues
                .entry(cache.collection_id)
                .or_default()
                .push_front(cache);
        }
        state.queues.retain(|_, queue| !queue.is_empty());
        state.in_use = false;
        done
    }

    /// Runs `callback` only if nothing is queued, holding the queue lock so
    /// nothing gets queued meanwhile. Returns whether it ran.
    pub(crate) fn execute_while_empty<F: FnOnce()>(&self, callback: F) -> bool {
        let state = self.state.lock();
        if state.in_use || state.queues.values().any(|queue| !queue.is_empty()) {
            return false;
        }
        callback();
        true
    }
}
