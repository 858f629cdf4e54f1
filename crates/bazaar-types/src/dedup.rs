//! Bounded FIFO-evicting set.
//!
//! The transport is at-least-once, so every consumer deduplicates by message
//! id, and payment settlement suppresses replayed requests by idempotency
//! key. Both sets are capacity-bounded with oldest-inserted-first eviction;
//! this is the only automatic cleanup in the system. An evicted id could in
//! principle be reprocessed if redelivered much later — accepted tradeoff.

use std::collections::{HashSet, VecDeque};

/// Default capacity for dedup and idempotency sets.
pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

/// An insertion-ordered set that evicts its oldest entry past capacity.
#[derive(Debug)]
pub struct BoundedSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedSet {
    /// Create a set holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a key. Returns `true` if the key was not already present.
    ///
    /// When the insert pushes the set past capacity, the oldest-inserted
    /// entry is evicted before returning.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Whether the key is currently tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BoundedSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
