// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared task executor: fixed worker pool plus a timer thread.
//!
//! Listener signaling, latched replay, reconnect back-off, and
//! registration retries all run here so that no callback ever executes on
//! a network thread.
//!
//! ```text
//!   execute(task) ----------------> [work queue] --> worker 0
//!                                        ^          worker 1
//!   schedule_after(delay, task) --+      |          ...
//!                                 v      |
//!                            [timer heap]+---(due)--^
//! ```
//!
//! Shutdown closes the work queue, discards not-yet-due timers, and joins
//! the threads with a bounded wait. The executor is cheap to clone; all
//! clones share the same pool, and shutdown through any clone stops them
//! all. There is no implicit shutdown on drop.

use crate::error::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct TimedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimedTask {}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline wins.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimedTask>,
    next_seq: u64,
}

struct ExecutorInner {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    timer: Mutex<TimerState>,
    timer_wake: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    tasks_executed: AtomicU64,
}

/// Fixed-size worker pool with a delayed-task facility.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    /// Spawn `threads` workers (floor of 1) plus one timer thread.
    ///
    /// `name` tags the thread names and log lines.
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Task>();

        let inner = Arc::new(ExecutorInner {
            name: name.to_string(),
            sender: Mutex::new(Some(sender.clone())),
            timer: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            timer_wake: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(threads + 1)),
            shutdown: AtomicBool::new(false),
            tasks_executed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(threads + 1);
        for i in 0..threads {
            let worker_inner = Arc::clone(&inner);
            let worker_receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("hros-exec-{}-{}", name, i))
                .spawn(move || worker_loop(&worker_inner, &worker_receiver))?;
            handles.push(handle);
        }

        let timer_inner = Arc::clone(&inner);
        let timer_handle = thread::Builder::new()
            .name(format!("hros-exec-{}-timer", name))
            .spawn(move || timer_loop(&timer_inner, sender))?;
        handles.push(timer_handle);

        *inner.workers.lock() = handles;
        log::debug!("[EXEC] Executor '{}' started with {} workers", name, threads);
        Ok(Self { inner })
    }

    /// Submit a task for execution on the pool.
    ///
    /// After shutdown the task is dropped with a warning.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            log::warn!(
                "[EXEC] Executor '{}' is shut down, dropping task",
                self.inner.name
            );
            return;
        }
        let guard = self.inner.sender.lock();
        if let Some(sender) = guard.as_ref() {
            // Send can only fail if every receiver is gone, i.e. shutdown
            // raced us. The task is dropped either way.
            let _ = sender.send(Box::new(task));
        }
    }

    /// Run a task on the pool after `delay`.
    ///
    /// Tasks still pending at shutdown are discarded.
    pub fn schedule_after<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            log::warn!(
                "[EXEC] Executor '{}' is shut down, dropping delayed task",
                self.inner.name
            );
            return;
        }
        let mut timer = self.inner.timer.lock();
        let seq = timer.next_seq;
        timer.next_seq += 1;
        timer.heap.push(TimedTask {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        });
        drop(timer);
        self.inner.timer_wake.notify_one();
    }

    /// Stop accepting work, drain the queue, and join the threads.
    ///
    /// Already-queued tasks still run; not-yet-due delayed tasks are
    /// discarded. Returns `false` if some thread was still busy when
    /// `wait` expired (it is then detached). Idempotent.
    pub fn shutdown(&self, wait: Duration) -> bool {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            // Another caller already shut us down; nothing left to join.
            return self.inner.workers.lock().is_empty();
        }
        log::debug!("[EXEC] Executor '{}' shutting down", self.inner.name);

        // Dropping the main sender lets workers drain and exit; the timer
        // holds its own clone and drops it when it observes the flag.
        *self.inner.sender.lock() = None;
        // Take the timer lock so the wakeup cannot slip between the
        // timer's flag check and its wait.
        drop(self.inner.timer.lock());
        self.inner.timer_wake.notify_one();

        let handles = std::mem::take(&mut *self.inner.workers.lock());
        let deadline = Instant::now() + wait;
        let mut all_joined = true;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!(
                    "[EXEC] Executor '{}' worker still busy after {:?}, detaching",
                    self.inner.name,
                    wait
                );
                all_joined = false;
            }
        }
        all_joined
    }

    /// Total tasks completed by the pool.
    pub fn tasks_executed(&self) -> u64 {
        self.inner.tasks_executed.load(Ordering::Relaxed)
    }
}

fn worker_loop(inner: &Arc<ExecutorInner>, receiver: &Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        task();
        inner.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }
    log::trace!("[EXEC] Worker in '{}' exiting", inner.name);
}

fn timer_loop(inner: &Arc<ExecutorInner>, sender: Sender<Task>) {
    let mut state = inner.timer.lock();
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            let discarded = state.heap.len();
            if discarded > 0 {
                log::debug!(
                    "[EXEC] Timer in '{}' discarding {} pending tasks",
                    inner.name,
                    discarded
                );
                state.heap.clear();
            }
            break;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|timed| timed.deadline <= now)
        {
            if let Some(timed) = state.heap.pop() {
                due.push(timed.task);
            }
        }
        if !due.is_empty() {
            drop(state);
            for task in due {
                let _ = sender.send(task);
            }
            state = inner.timer.lock();
            continue;
        }

        match state.heap.peek().map(|timed| timed.deadline) {
            Some(deadline) => {
                inner.timer_wake.wait_until(&mut state, deadline);
            }
            None => inner.timer_wake.wait(&mut state),
        }
    }
    drop(state);
    drop(sender);
}
