// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out of events to registered listener objects.
//!
//! Listeners are held as `Arc<L>` (usually `Arc<dyn SomeListener>`) and
//! signaled off the caller's thread, so a slow listener never stalls
//! transport or registration threads. Each listener owns a serial queue
//! drained on the shared [`TaskExecutor`]: events for one listener run in
//! FIFO order and never concurrently with each other, while distinct
//! listeners run in parallel.
//!
//! [`ListenerGroup::signal_and_wait`] is the synchronous variant used by
//! shutdown paths and tests that must observe delivery before returning.

use crate::concurrent::TaskExecutor;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Serial queue
// ============================================================================

type Task = Box<dyn FnOnce() + Send + 'static>;

struct SerialState {
    pending: VecDeque<Task>,
    draining: bool,
}

/// FIFO task queue drained one task at a time on a shared executor.
#[derive(Clone)]
struct SerialQueue {
    executor: TaskExecutor,
    state: Arc<Mutex<SerialState>>,
}

impl SerialQueue {
    fn new(executor: TaskExecutor) -> Self {
        Self {
            executor,
            state: Arc::new(Mutex::new(SerialState {
                pending: VecDeque::new(),
                draining: false,
            })),
        }
    }

    fn execute<F: FnOnce() + Send + 'static>(&self, f: F) {
        let mut state = self.state.lock();
        state.pending.push_back(Box::new(f));
        if state.draining {
            return;
        }
        state.draining = true;
        drop(state);
        let state = Arc::clone(&self.state);
        self.executor.execute(move || drain(&state));
    }
}

fn drain(state: &Mutex<SerialState>) {
    loop {
        let task = {
            let mut state = state.lock();
            match state.pending.pop_front() {
                Some(task) => task,
                None => {
                    state.draining = false;
                    return;
                }
            }
        };
        task();
    }
}

// ============================================================================
// Countdown latch
// ============================================================================

struct Countdown {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl Countdown {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            drop(remaining);
            self.done.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.done.wait_for(&mut remaining, deadline - now);
        }
        true
    }
}

// ============================================================================
// Listener group
// ============================================================================

struct Entry<L: ?Sized> {
    listener: Arc<L>,
    queue: SerialQueue,
}

impl<L: ?Sized> Clone for Entry<L> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            queue: self.queue.clone(),
        }
    }
}

/// Registry of listeners signaled through per-listener serial queues.
pub struct ListenerGroup<L: ?Sized> {
    executor: TaskExecutor,
    listeners: RwLock<Vec<Entry<L>>>,
}

impl<L: ?Sized> ListenerGroup<L> {
    pub fn new(executor: TaskExecutor) -> Self {
        Self {
            executor,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener for future signals.
    pub fn add(&self, listener: Arc<L>) {
        let entry = Entry {
            listener,
            queue: SerialQueue::new(self.executor.clone()),
        };
        self.listeners.write().push(entry);
    }

    /// Remove a listener by identity. Returns `true` if it was present.
    ///
    /// Events already queued for it still run.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|held| !Arc::ptr_eq(&held.listener, listener));
        listeners.len() < before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<L: ?Sized + Send + Sync + 'static> ListenerGroup<L> {
    /// Register a listener whose first queued event is `seed`.
    ///
    /// The seed runs before any event signaled after this call returns;
    /// used for latched-message replay to late joiners.
    pub fn add_seeded<F>(&self, listener: Arc<L>, seed: F)
    where
        F: FnOnce(&L) + Send + 'static,
    {
        let entry = Entry {
            listener: Arc::clone(&listener),
            queue: SerialQueue::new(self.executor.clone()),
        };
        entry.queue.execute(move || seed(&listener));
        self.listeners.write().push(entry);
    }

    /// Queue `f` for every registered listener, fire-and-forget.
    ///
    /// The listener set is snapshotted first, so listeners added or removed
    /// while the signal is in flight do not affect this dispatch.
    pub fn signal<F>(&self, f: F)
    where
        F: Fn(&L) + Send + Sync + 'static,
    {
        let snapshot: Vec<Entry<L>> = self.listeners.read().clone();
        let f = Arc::new(f);
        for entry in snapshot {
            let f = Arc::clone(&f);
            let listener = Arc::clone(&entry.listener);
            entry.queue.execute(move || f(&listener));
        }
    }

    /// Queue `f` for every registered listener and block until all
    /// invocations complete or `timeout` expires.
    ///
    /// Returns `false` on timeout, with any unfinished invocations still
    /// queued.
    pub fn signal_and_wait<F>(&self, f: F, timeout: Duration) -> bool
    where
        F: Fn(&L) + Send + Sync + 'static,
    {
        let snapshot: Vec<Entry<L>> = self.listeners.read().clone();
        if snapshot.is_empty() {
            return true;
        }
        let latch = Arc::new(Countdown::new(snapshot.len()));
        let f = Arc::new(f);
        for entry in snapshot {
            let f = Arc::clone(&f);
            let listener = Arc::clone(&entry.listener);
            let latch = Arc::clone(&latch);
            entry.queue.execute(move || {
                f(&listener);
                latch.count_down();
            });
        }
        latch.wait(timeout)
    }
}
