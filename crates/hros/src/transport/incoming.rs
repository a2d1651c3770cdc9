// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incoming message queue.
//!
//! One per subscriber. Reader loops push raw frame payloads through a
//! [`FrameReceiver`]; a dedicated dispatch loop deserializes each frame and
//! signals every registered listener off the network thread. Messages are
//! also buffered for blocking [`IncomingMessageQueue::take`] callers.
//!
//! ```text
//! reader loop -> FrameReceiver::push -> [raw ring] -> dispatch loop
//!                                                        |-> listeners
//!                                                        '-> take()/poll()
//! ```
//!
//! With latch mode on, a listener added after traffic has flowed gets the
//! most recent message replayed as its first delivery, ahead of any live
//! message dispatched later.

use crate::concurrent::{BoundedEvictionQueue, CancellableLoop, ListenerGroup, TaskExecutor};
use crate::config::TransportConfig;
use crate::error::Result;
use crate::message::MessageDeserializer;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receives deserialized messages from an incoming queue's dispatch loop.
pub trait MessageListener<M>: Send + Sync {
    fn on_new_message(&self, message: Arc<M>);
}

/// Producer handle reader loops use to feed raw frames into the queue.
#[derive(Clone)]
pub struct FrameReceiver {
    ring: Arc<BoundedEvictionQueue<Vec<u8>>>,
}

impl FrameReceiver {
    pub(crate) fn new(ring: Arc<BoundedEvictionQueue<Vec<u8>>>) -> Self {
        Self { ring }
    }

    /// Hand one frame payload to the queue. Never blocks; after shutdown
    /// this is a silent no-op.
    pub fn push(&self, frame: Vec<u8>) {
        self.ring.add(frame);
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }
}

/// Counters for one incoming queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncomingQueueStats {
    /// Frames accepted from reader loops.
    pub received: u64,
    /// Frames overwritten in the ring before dispatch.
    pub evicted: u64,
    /// Messages deserialized and signaled to listeners.
    pub dispatched: u64,
    /// Frames dropped because deserialization failed.
    pub decode_failures: u64,
}

struct IncomingCore<M> {
    name: String,
    raw_frames: Arc<BoundedEvictionQueue<Vec<u8>>>,
    delivered: BoundedEvictionQueue<Arc<M>>,
    deserializer: Arc<dyn MessageDeserializer<M>>,
    listeners: ListenerGroup<dyn MessageListener<M>>,
    latch_mode: AtomicBool,
    last_message: ArcSwapOption<M>,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
}

impl<M: Send + Sync + 'static> IncomingCore<M> {
    /// Dispatch loop body: one frame in, one fan-out.
    fn dispatch_next(&self) -> bool {
        let frame = match self.raw_frames.take() {
            Some(frame) => frame,
            None => return false,
        };
        match self.deserializer.deserialize(&frame) {
            Ok(message) => {
                let message = Arc::new(message);
                self.last_message.store(Some(Arc::clone(&message)));
                self.delivered.add(Arc::clone(&message));
                let seq = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!(
                    "[INQ] '{}' dispatching #{} ({} bytes) to {} listener(s)",
                    self.name,
                    seq,
                    frame.len(),
                    self.listeners.len()
                );
                self.listeners
                    .signal(move |l| l.on_new_message(Arc::clone(&message)));
            }
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "[INQ] '{}' dropping undecodable frame ({} bytes): {}",
                    self.name,
                    frame.len(),
                    e
                );
            }
        }
        true
    }
}

/// Deserializing fan-in queue with a dedicated dispatch loop.
///
/// All methods take `&self`, so the queue is usually shared as an `Arc`
/// between the connection layer feeding frames and the subscriber API.
pub struct IncomingMessageQueue<M> {
    core: Arc<IncomingCore<M>>,
    dispatch_loop: Mutex<CancellableLoop>,
}

impl<M: Send + Sync + 'static> IncomingMessageQueue<M> {
    pub fn new(
        name: &str,
        deserializer: Arc<dyn MessageDeserializer<M>>,
        executor: TaskExecutor,
        config: &TransportConfig,
    ) -> Self {
        let raw_frames = Arc::new(BoundedEvictionQueue::new(config.queue_capacity));
        let core = Arc::new(IncomingCore {
            name: name.to_string(),
            raw_frames: Arc::clone(&raw_frames),
            delivered: BoundedEvictionQueue::new(config.queue_capacity),
            deserializer,
            listeners: ListenerGroup::new(executor),
            latch_mode: AtomicBool::new(false),
            last_message: ArcSwapOption::const_empty(),
            dispatched: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        });
        let loop_core = Arc::clone(&core);
        let dispatch_loop = CancellableLoop::new(&format!("hros-in-{}", name), move || {
            loop_core.dispatch_next()
        })
        .with_interrupt(move || raw_frames.close());
        Self {
            core,
            dispatch_loop: Mutex::new(dispatch_loop),
        }
    }

    /// Launch the dispatch loop.
    pub fn start(&self) -> Result<()> {
        log::debug!("[INQ] '{}' starting dispatch loop", self.core.name);
        self.dispatch_loop.lock().start()
    }

    /// Handle for reader loops to push raw frames through.
    pub fn frame_receiver(&self) -> FrameReceiver {
        FrameReceiver::new(Arc::clone(&self.core.raw_frames))
    }

    /// Register a listener.
    ///
    /// With latch mode on and a message already received, the listener's
    /// first delivery is a replay of that message, queued before any live
    /// message dispatched after this call.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener<M>>) {
        if self.core.latch_mode.load(Ordering::Acquire) {
            if let Some(last) = self.core.last_message.load_full() {
                log::debug!(
                    "[INQ] '{}' scheduling latched replay for new listener",
                    self.core.name
                );
                self.core
                    .listeners
                    .add_seeded(listener, move |l| l.on_new_message(last));
                return;
            }
        }
        self.core.listeners.add(listener);
    }

    /// Remove a listener by identity. Returns `true` if it was present.
    pub fn remove_listener(&self, listener: &Arc<dyn MessageListener<M>>) -> bool {
        self.core.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.core.listeners.len()
    }

    /// Block until the next message arrives. `None` after shutdown.
    pub fn take(&self) -> Option<Arc<M>> {
        self.core.delivered.take()
    }

    /// Like [`IncomingMessageQueue::take`] with a deadline.
    pub fn poll(&self, timeout: Duration) -> Option<Arc<M>> {
        self.core.delivered.poll(timeout)
    }

    pub fn set_latch_mode(&self, enabled: bool) {
        self.core.latch_mode.store(enabled, Ordering::Release);
    }

    pub fn latch_mode(&self) -> bool {
        self.core.latch_mode.load(Ordering::Acquire)
    }

    /// Cap both the raw frame ring and the buffer of undispatched messages.
    ///
    /// Shrinking evicts the oldest entries beyond the new limit.
    pub fn set_limit(&self, limit: usize) {
        self.core.raw_frames.set_limit(limit);
        self.core.delivered.set_limit(limit);
    }

    pub fn limit(&self) -> usize {
        self.core.delivered.limit()
    }

    /// Stop the dispatch loop and unblock any `take` callers. Idempotent.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        log::debug!("[INQ] '{}' shutting down", self.core.name);
        let mut dispatch_loop = self.dispatch_loop.lock();
        dispatch_loop.cancel();
        let finished = dispatch_loop.await_termination(timeout);
        if !finished {
            log::debug!(
                "[INQ] '{}' dispatch loop still running after {:?}",
                self.core.name,
                timeout
            );
        }
        self.core.delivered.close();
        finished
    }

    pub fn stats(&self) -> IncomingQueueStats {
        let ring = self.core.raw_frames.stats();
        IncomingQueueStats {
            received: ring.added,
            evicted: ring.evicted,
            dispatched: self.core.dispatched.load(Ordering::Relaxed),
            decode_failures: self.core.decode_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageSerializer, StringCodec};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Instant;

    struct RecordingListener(Mutex<Vec<String>>);

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn seen(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl MessageListener<String> for RecordingListener {
        fn on_new_message(&self, message: Arc<String>) {
            self.0.lock().push((*message).clone());
        }
    }

    fn payload(text: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        StringCodec.serialize(&text.to_string(), &mut buf);
        buf
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn queue(name: &str, executor: &TaskExecutor) -> IncomingMessageQueue<String> {
        IncomingMessageQueue::new(
            name,
            Arc::new(StringCodec),
            executor.clone(),
            &TransportConfig::default(),
        )
    }

    #[test]
    fn test_listener_receives_fifo() {
        let exec = TaskExecutor::new("inq-fifo", 2).unwrap();
        let inq = queue("fifo", &exec);
        let listener = RecordingListener::new();
        inq.add_listener(listener.clone());
        inq.start().unwrap();
        let rx = inq.frame_receiver();
        rx.push(payload("a"));
        rx.push(payload("b"));
        rx.push(payload("c"));
        assert!(wait_until(Duration::from_secs(3), || listener.seen().len() == 3));
        assert_eq!(listener.seen(), vec!["a", "b", "c"]);
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_take_returns_dispatched_message() {
        let exec = TaskExecutor::new("inq-take", 2).unwrap();
        let inq = queue("take", &exec);
        inq.start().unwrap();
        inq.frame_receiver().push(payload("hello"));
        let message = inq.poll(Duration::from_secs(3)).unwrap();
        assert_eq!(*message, "hello");
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_latch_replay_is_first_delivery() {
        let exec = TaskExecutor::new("inq-latch", 2).unwrap();
        let inq = queue("latch", &exec);
        inq.set_latch_mode(true);
        inq.start().unwrap();
        inq.frame_receiver().push(payload("latched"));
        assert!(wait_until(Duration::from_secs(3), || inq.stats().dispatched == 1));

        let late = RecordingListener::new();
        inq.add_listener(late.clone());
        inq.frame_receiver().push(payload("live"));
        assert!(wait_until(Duration::from_secs(3), || late.seen().len() == 2));
        assert_eq!(late.seen(), vec!["latched", "live"]);
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_no_latch_no_replay() {
        let exec = TaskExecutor::new("inq-no-latch", 2).unwrap();
        let inq = queue("no-latch", &exec);
        inq.start().unwrap();
        inq.frame_receiver().push(payload("old"));
        assert!(wait_until(Duration::from_secs(3), || inq.stats().dispatched == 1));

        let listener = RecordingListener::new();
        inq.add_listener(listener.clone());
        inq.frame_receiver().push(payload("new"));
        assert!(wait_until(Duration::from_secs(3), || !listener.seen().is_empty()));
        assert_eq!(listener.seen(), vec!["new"]);
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_undecodable_frame_skipped() {
        let exec = TaskExecutor::new("inq-garbage", 2).unwrap();
        let inq = queue("garbage", &exec);
        let listener = RecordingListener::new();
        inq.add_listener(listener.clone());
        inq.start().unwrap();
        let rx = inq.frame_receiver();
        rx.push(vec![0xff]);
        rx.push(payload("good"));
        assert!(wait_until(Duration::from_secs(3), || !listener.seen().is_empty()));
        assert_eq!(listener.seen(), vec!["good"]);
        assert_eq!(inq.stats().decode_failures, 1);
        assert_eq!(inq.stats().dispatched, 1);
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shrinking_limit_evicts_oldest_buffered() {
        let exec = TaskExecutor::new("inq-limit", 2).unwrap();
        let inq = queue("limit", &exec);
        inq.start().unwrap();
        let rx = inq.frame_receiver();
        rx.push(payload("a"));
        rx.push(payload("b"));
        rx.push(payload("c"));
        assert!(wait_until(Duration::from_secs(3), || inq.stats().dispatched == 3));

        inq.set_limit(1);
        assert_eq!(inq.limit(), 1);
        assert_eq!(*inq.poll(Duration::from_secs(1)).unwrap(), "c");
        assert!(inq.poll(Duration::from_millis(50)).is_none());
        inq.shutdown(Duration::from_secs(2));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_unblocks_take() {
        let exec = TaskExecutor::new("inq-unblock", 2).unwrap();
        let inq = queue("unblock", &exec);
        inq.start().unwrap();
        let core = Arc::clone(&inq.core);
        let taker = thread::spawn(move || core.delivered.take());
        thread::sleep(Duration::from_millis(50));
        assert!(inq.shutdown(Duration::from_secs(2)));
        assert!(taker.join().unwrap().is_none());
        assert!(inq.take().is_none());
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let exec = TaskExecutor::new("inq-idem", 2).unwrap();
        let inq = queue("idem", &exec);
        inq.start().unwrap();
        assert!(inq.shutdown(Duration::from_secs(2)));
        assert!(inq.shutdown(Duration::from_secs(2)));
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_push_after_shutdown_is_noop() {
        let exec = TaskExecutor::new("inq-post", 2).unwrap();
        let inq = queue("post", &exec);
        inq.start().unwrap();
        let rx = inq.frame_receiver();
        inq.shutdown(Duration::from_secs(2));
        assert!(rx.is_closed());
        rx.push(payload("dropped"));
        assert_eq!(inq.stats().received, 0);
        exec.shutdown(Duration::from_secs(1));
    }
}
