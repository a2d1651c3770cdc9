// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity ring buffer with blocking take and overwrite-on-full add.
//!
//! The foundational primitive for both message queues. `add` never blocks:
//! when the queue holds `limit` entries, the oldest is evicted to make room.
//! This is a deliberate lossy policy (latest-N semantics) for telemetry-style
//! pub/sub where stale data is worthless.
//!
//! ```text
//!             start
//!               v
//!   +---+---+---+---+---+
//!   |   |   | A | B | C |      add(D), len == limit == 3
//!   +---+---+---+---+---+
//!                 v
//!   +---+---+---+---+---+
//!   | D |   |   | B | C |      A evicted, start advanced
//!   +---+---+---+---+---+
//! ```
//!
//! `close()` wakes every blocked taker permanently; it is how owning loops
//! are unblocked during shutdown.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counters for queue activity. Snapshot via [`BoundedEvictionQueue::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items accepted by `add`.
    pub added: u64,
    /// Items handed out by `take`/`poll`.
    pub taken: u64,
    /// Items evicted by overwrite or `set_limit` shrink.
    pub evicted: u64,
}

struct Ring<T> {
    slots: Vec<Option<T>>,
    start: usize,
    len: usize,
    limit: usize,
    closed: bool,
    stats: QueueStats,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.start].take();
        self.start = (self.start + 1) % self.capacity();
        self.len -= 1;
        item
    }

    fn evict_front(&mut self) -> Option<T> {
        let evicted = self.pop_front();
        if evicted.is_some() {
            self.stats.evicted += 1;
        }
        evicted
    }
}

/// Bounded FIFO queue that evicts the oldest entry instead of blocking
/// producers.
///
/// Invariant: `0 <= len <= limit <= capacity`. `take()` blocks while the
/// queue is empty and not closed; `add()` never blocks.
pub struct BoundedEvictionQueue<T> {
    inner: Mutex<Ring<T>>,
    available: Condvar,
}

impl<T> BoundedEvictionQueue<T> {
    /// Create a queue with the given fixed capacity (floor of 1).
    ///
    /// The eviction limit starts equal to the capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                start: 0,
                len: 0,
                limit: capacity,
                closed: false,
                stats: QueueStats::default(),
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item, evicting the oldest entry when the queue holds
    /// `limit` items. Never blocks.
    ///
    /// Returns the evicted item, if any. With `limit == 0` the incoming
    /// item itself is the eviction victim. After `close()` this is a
    /// silent no-op and the item is dropped.
    pub fn add(&self, item: T) -> Option<T> {
        let mut ring = self.inner.lock();
        if ring.closed {
            return None;
        }
        if ring.limit == 0 {
            ring.stats.evicted += 1;
            return Some(item);
        }
        let mut evicted = None;
        if ring.len == ring.limit {
            evicted = ring.evict_front();
        }
        let idx = (ring.start + ring.len) % ring.capacity();
        ring.slots[idx] = Some(item);
        ring.len += 1;
        ring.stats.added += 1;
        drop(ring);
        self.available.notify_one();
        evicted
    }

    /// Remove and return the oldest item, blocking while the queue is
    /// empty. Returns `None` once the queue has been closed.
    pub fn take(&self) -> Option<T> {
        let mut ring = self.inner.lock();
        loop {
            if ring.closed {
                return None;
            }
            if let Some(item) = ring.pop_front() {
                ring.stats.taken += 1;
                return Some(item);
            }
            self.available.wait(&mut ring);
        }
    }

    /// Bounded-wait variant of [`take`](Self::take). Returns `None` on
    /// timeout or once the queue has been closed.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.inner.lock();
        loop {
            if ring.closed {
                return None;
            }
            if let Some(item) = ring.pop_front() {
                ring.stats.taken += 1;
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.available.wait_for(&mut ring, deadline - now);
        }
    }

    /// Shrink (or restore, up to capacity) the eviction limit, evicting
    /// the oldest entries beyond the new limit immediately.
    pub fn set_limit(&self, limit: usize) {
        let mut ring = self.inner.lock();
        let limit = limit.min(ring.capacity());
        ring.limit = limit;
        while ring.len > limit {
            ring.evict_front();
        }
    }

    /// Current eviction limit.
    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Wake every blocked taker permanently. Subsequent `take`/`poll`
    /// return `None` and `add` becomes a no-op. Idempotent.
    pub fn close(&self) {
        let mut ring = self.inner.lock();
        ring.closed = true;
        drop(ring);
        self.available.notify_all();
    }

    /// True once `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}
