// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run a body repeatedly on a dedicated thread until canceled.
//!
//! ```text
//!   NOT_STARTED ---start()---> RUNNING ---body returns false---> FINISHED
//!        |                        |                                 ^
//!        +----cancel()------------+------------cancel()------------+
//! ```
//!
//! `cancel()` is idempotent, safe before `start()` (the start is then
//! pre-empted and the loop goes straight to FINISHED), and safe during the
//! run. A loop cannot be restarted once FINISHED.
//!
//! Bodies that block (on a ring take or a socket read) are unblocked
//! through the interrupt hook, which `cancel()` invokes exactly once;
//! owners wire it to close the resource the body blocks on.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a [`CancellableLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not yet started.
    NotStarted,
    /// Body executing on the loop thread.
    Running,
    /// Terminated; cannot be restarted.
    Finished,
}

impl LoopState {
    pub fn is_not_started(&self) -> bool {
        matches!(self, LoopState::NotStarted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LoopState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, LoopState::Finished)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::NotStarted => write!(f, "NOT_STARTED"),
            LoopState::Running => write!(f, "RUNNING"),
            LoopState::Finished => write!(f, "FINISHED"),
        }
    }
}

type InterruptHook = Box<dyn Fn() + Send + Sync + 'static>;

struct Lifecycle {
    state: LoopState,
    // True when cancel() pre-empted a loop that was never started, so a
    // later start() is a quiet no-op instead of a double-start error.
    preempted: bool,
}

struct LoopShared {
    // Hot flag checked by the loop thread between iterations.
    cancel_requested: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    finished_wake: Condvar,
    interrupt: Mutex<Option<InterruptHook>>,
}

impl LoopShared {
    fn mark_finished(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = LoopState::Finished;
        drop(lifecycle);
        self.finished_wake.notify_all();
    }
}

/// Dedicated-thread loop with idempotent cancellation.
pub struct CancellableLoop {
    name: String,
    shared: Arc<LoopShared>,
    body: Option<Box<dyn FnMut() -> bool + Send + 'static>>,
    handle: Option<JoinHandle<()>>,
}

impl CancellableLoop {
    /// Create a loop that repeatedly runs `body` once started.
    ///
    /// The body returns `true` to keep iterating; `false` finishes the
    /// loop from inside (used when a blocking source reports closure).
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            name: name.to_string(),
            shared: Arc::new(LoopShared {
                cancel_requested: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    state: LoopState::NotStarted,
                    preempted: false,
                }),
                finished_wake: Condvar::new(),
                interrupt: Mutex::new(None),
            }),
            body: Some(Box::new(body)),
            handle: None,
        }
    }

    /// Install the hook `cancel()` uses to unblock the body.
    pub fn with_interrupt<F>(self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.interrupt.lock() = Some(Box::new(hook));
        self
    }

    /// Launch the loop thread.
    ///
    /// A loop canceled before start finishes immediately without running
    /// the body. Starting twice is an error.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            match lifecycle.state {
                LoopState::NotStarted => {
                    if self.shared.cancel_requested.load(Ordering::Acquire) {
                        log::debug!("[LOOP] '{}' canceled before start", self.name);
                        lifecycle.state = LoopState::Finished;
                        lifecycle.preempted = true;
                        drop(lifecycle);
                        self.shared.finished_wake.notify_all();
                        self.body = None;
                        return Ok(());
                    }
                    lifecycle.state = LoopState::Running;
                }
                LoopState::Finished if lifecycle.preempted => {
                    log::debug!("[LOOP] '{}' canceled before start", self.name);
                    self.body = None;
                    return Ok(());
                }
                _ => {
                    return Err(Error::InvalidState(format!(
                        "loop '{}' already started",
                        self.name
                    )));
                }
            }
        }

        let mut body = self.body.take().ok_or_else(|| {
            Error::InvalidState(format!("loop '{}' has no body left", self.name))
        })?;
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            log::debug!("[LOOP] '{}' running", name);
            while !shared.cancel_requested.load(Ordering::Acquire) && body() {}
            shared.mark_finished();
            log::debug!("[LOOP] '{}' finished", name);
        })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Request termination. Idempotent; safe before start and during run.
    pub fn cancel(&self) {
        if self.shared.cancel_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("[LOOP] '{}' cancel requested", self.name);
        if let Some(hook) = self.shared.interrupt.lock().as_ref() {
            hook();
        }
        // Pre-empt a loop that was never started.
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state.is_not_started() {
            lifecycle.state = LoopState::Finished;
            lifecycle.preempted = true;
            drop(lifecycle);
            self.shared.finished_wake.notify_all();
        }
    }

    /// Block until the loop reaches FINISHED, joining the thread.
    ///
    /// Returns `false` if the wait expired with the loop still running.
    pub fn await_termination(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            while !lifecycle.state.is_finished() {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                self.shared
                    .finished_wake
                    .wait_for(&mut lifecycle, deadline - now);
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.shared.lifecycle.lock().state
    }

    /// True while the loop thread is executing the body.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Loop thread name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CancellableLoop {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_state_transitions() {
        let mut looper = CancellableLoop::new("t", || {
            thread::sleep(Duration::from_millis(1));
            true
        });
        assert!(looper.state().is_not_started());
        looper.start().unwrap();
        assert!(looper.state().is_running());
        looper.cancel();
        assert!(looper.await_termination(Duration::from_secs(2)));
        assert!(looper.state().is_finished());
    }

    #[test]
    fn test_body_runs_repeatedly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let mut looper = CancellableLoop::new("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            true
        });
        looper.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        looper.cancel();
        assert!(looper.await_termination(Duration::from_secs(2)));
        assert!(counter.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_cancel_before_start_preempts() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let mut looper = CancellableLoop::new("pre", move || {
            r.store(true, Ordering::SeqCst);
            true
        });
        looper.cancel();
        looper.start().unwrap();
        assert!(looper.state().is_finished());
        assert!(looper.await_termination(Duration::from_secs(1)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut looper = CancellableLoop::new("idem", || true);
        looper.start().unwrap();
        looper.cancel();
        looper.cancel();
        assert!(looper.await_termination(Duration::from_secs(2)));
    }

    #[test]
    fn test_start_twice_is_error() {
        let mut looper = CancellableLoop::new("twice", || {
            thread::sleep(Duration::from_millis(1));
            true
        });
        looper.start().unwrap();
        assert!(looper.start().is_err());
        looper.cancel();
        looper.await_termination(Duration::from_secs(2));
    }

    #[test]
    fn test_body_false_finishes_loop() {
        let mut looper = CancellableLoop::new("self-stop", || false);
        looper.start().unwrap();
        assert!(looper.await_termination(Duration::from_secs(2)));
        assert!(looper.state().is_finished());
    }

    #[test]
    fn test_interrupt_hook_unblocks_body() {
        let queue = Arc::new(crate::concurrent::BoundedEvictionQueue::<u8>::new(4));
        let q = Arc::clone(&queue);
        let q_hook = Arc::clone(&queue);
        let mut looper = CancellableLoop::new("blocked", move || q.take().is_some())
            .with_interrupt(move || q_hook.close());
        looper.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        looper.cancel();
        assert!(looper.await_termination(Duration::from_secs(2)));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(LoopState::NotStarted.to_string(), "NOT_STARTED");
        assert_eq!(LoopState::Running.to_string(), "RUNNING");
        assert_eq!(LoopState::Finished.to_string(), "FINISHED");
    }
}
