//! LRU Tracker Module
//!
//! Least-recently-accessed ordering for demotion and capacity eviction.
//!
//! Entries stamp themselves with ticks from a shared [`AccessClock`] on every
//! read, so reads never touch a cache-wide structure. An [`LruTracker`] is
//! built from a snapshot of those stamps only when something must be evicted.

use std::sync::atomic::{AtomicU64, Ordering};

// == Access Clock ==
/// Monotonic logical clock; a larger tick means a more recent access.
#[derive(Debug, Default)]
pub struct AccessClock {
    now: AtomicU64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock and returns the new tick.
    pub fn tick(&self) -> u64 {
        self.now.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

// == LRU Tracker ==
/// Snapshot of candidates ordered by last access.
///
/// Items are sorted lazily on first eviction; the back of the sorted vector
/// holds the least recently used item.
#[derive(Debug)]
pub struct LruTracker<T> {
    order: Vec<(u64, T)>,
    sorted: bool,
}

impl<T> Default for LruTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LruTracker<T> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            sorted: true,
        }
    }

    // == Record ==
    /// Adds a candidate last accessed at `tick`.
    pub fn record(&mut self, item: T, tick: u64) {
        self.order.push((tick, item));
        self.sorted = false;
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used item.
    pub fn evict_oldest(&mut self) -> Option<T> {
        self.sort();
        self.order.pop().map(|(_, item)| item)
    }

    // == Peek Oldest ==
    pub fn peek_oldest(&mut self) -> Option<&T> {
        self.sort();
        self.order.last().map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn sort(&mut self) {
        if !self.sorted {
            // newest first, so pop() yields the oldest
            self.order.sort_by(|a, b| b.0.cmp(&a.0));
            self.sorted = true;
        }
    }
}
