// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outgoing message queue.
//!
//! One per publisher. Producers `put` typed messages; a dedicated send loop
//! drains the internal ring, serializes each message once, and broadcasts
//! the payload to every channel in the fan-out group. The ring keeps the
//! newest messages when producers outrun the network, so a stalled peer
//! costs freshness, never memory.
//!
//! ```text
//! put(M) -> [ring] -> send loop -> serialize -> ChannelGroup::write_all
//!             |                                      |
//!             +-- evicts oldest when full            +-- drops dead channels
//! ```
//!
//! With latch mode on, the most recent message is replayed synchronously to
//! every newly added channel before it sees any live traffic.

use crate::concurrent::{BoundedEvictionQueue, CancellableLoop};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::message::MessageSerializer;
use crate::transport::channel::{ChannelGroup, ChannelId, MessageChannel};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for one outgoing queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutgoingQueueStats {
    /// Messages accepted by `put`.
    pub queued: u64,
    /// Messages overwritten in the ring before the loop took them.
    pub evicted: u64,
    /// Messages the send loop serialized and broadcast.
    pub sent: u64,
    /// Successful per-channel writes, summed over all broadcasts.
    pub deliveries: u64,
    /// Latched messages replayed to newly added channels.
    pub latch_replays: u64,
}

struct OutgoingCore<M> {
    name: String,
    queue: Arc<BoundedEvictionQueue<Arc<M>>>,
    channels: ChannelGroup,
    serializer: Arc<dyn MessageSerializer<M>>,
    latch_mode: AtomicBool,
    last_message: ArcSwapOption<M>,
    sequence: AtomicU64,
    deliveries: AtomicU64,
    latch_replays: AtomicU64,
}

impl<M: Send + Sync + 'static> OutgoingCore<M> {
    fn serialize(&self, message: &M) -> Vec<u8> {
        let mut payload = Vec::new();
        self.serializer.serialize(message, &mut payload);
        payload
    }

    /// Send loop body: one take, one broadcast.
    fn send_next(&self) -> bool {
        let message = match self.queue.take() {
            Some(message) => message,
            None => return false,
        };
        let payload = self.serialize(&message);
        let delivered = self.channels.write_all(&payload);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        log::trace!(
            "[OUTQ] '{}' sent #{} ({} bytes) to {} channel(s)",
            self.name,
            seq,
            payload.len(),
            delivered
        );
        true
    }
}

/// Serializing broadcast queue with a dedicated send loop.
///
/// All methods take `&self`, so the queue is usually shared as an `Arc`
/// between the producing side and the server registering new channels.
pub struct OutgoingMessageQueue<M> {
    core: Arc<OutgoingCore<M>>,
    send_loop: Mutex<CancellableLoop>,
}

impl<M: Send + Sync + 'static> OutgoingMessageQueue<M> {
    pub fn new(
        name: &str,
        serializer: Arc<dyn MessageSerializer<M>>,
        config: &TransportConfig,
    ) -> Self {
        let queue = Arc::new(BoundedEvictionQueue::new(config.queue_capacity));
        let core = Arc::new(OutgoingCore {
            name: name.to_string(),
            queue: Arc::clone(&queue),
            channels: ChannelGroup::new(),
            serializer,
            latch_mode: AtomicBool::new(false),
            last_message: ArcSwapOption::const_empty(),
            sequence: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            latch_replays: AtomicU64::new(0),
        });
        let loop_core = Arc::clone(&core);
        let send_loop = CancellableLoop::new(&format!("hros-out-{}", name), move || {
            loop_core.send_next()
        })
        .with_interrupt(move || queue.close());
        Self {
            core,
            send_loop: Mutex::new(send_loop),
        }
    }

    /// Launch the send loop.
    pub fn start(&self) -> Result<()> {
        log::debug!("[OUTQ] '{}' starting send loop", self.core.name);
        self.send_loop.lock().start()
    }

    /// Enqueue a message for broadcast. Never blocks.
    ///
    /// The newest message always wins ring space; after `shutdown` the
    /// message is dropped with a warning.
    pub fn put(&self, message: M) {
        if self.core.queue.is_closed() {
            log::warn!("[OUTQ] '{}' is shut down, dropping message", self.core.name);
            return;
        }
        let message = Arc::new(message);
        self.core.last_message.store(Some(Arc::clone(&message)));
        self.core.queue.add(message);
    }

    /// Register a destination channel.
    ///
    /// With latch mode on and a message already seen, that message is
    /// written to the channel before this call returns, ahead of any live
    /// traffic. A channel that fails the replay write is closed and not
    /// registered, as is any channel offered after `shutdown`.
    pub fn add_channel(&self, channel: Arc<dyn MessageChannel>) -> Result<ChannelId> {
        if self.core.queue.is_closed() {
            log::warn!(
                "[OUTQ] '{}' is shut down, refusing channel {}",
                self.core.name,
                channel.remote_label()
            );
            return Err(Error::ChannelClosed);
        }
        if self.core.latch_mode.load(Ordering::Acquire) {
            if let Some(last) = self.core.last_message.load_full() {
                let payload = self.core.serialize(&last);
                if let Err(e) = channel.write_frame(&payload) {
                    log::debug!(
                        "[OUTQ] '{}' latch replay to {} failed: {}",
                        self.core.name,
                        channel.remote_label(),
                        e
                    );
                    channel.close();
                    return Err(e);
                }
                self.core.latch_replays.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "[OUTQ] '{}' replayed latched message to {}",
                    self.core.name,
                    channel.remote_label()
                );
            }
        }
        Ok(self.core.channels.add(channel))
    }

    /// Unregister a channel without closing it.
    pub fn remove_channel(&self, id: ChannelId) -> Option<Arc<dyn MessageChannel>> {
        self.core.channels.remove(id)
    }

    pub fn set_latch_mode(&self, enabled: bool) {
        self.core.latch_mode.store(enabled, Ordering::Release);
    }

    pub fn latch_mode(&self) -> bool {
        self.core.latch_mode.load(Ordering::Acquire)
    }

    /// Shrink the ring's live limit, evicting oldest entries beyond it.
    pub fn set_limit(&self, limit: usize) {
        self.core.queue.set_limit(limit);
    }

    pub fn limit(&self) -> usize {
        self.core.queue.limit()
    }

    pub fn len(&self) -> usize {
        self.core.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.queue.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.core.channels.len()
    }

    /// Stop the send loop and close every channel. Idempotent.
    ///
    /// Returns `false` if the loop did not terminate within `timeout`;
    /// channels are closed either way.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        log::debug!("[OUTQ] '{}' shutting down", self.core.name);
        let mut send_loop = self.send_loop.lock();
        send_loop.cancel();
        let finished = send_loop.await_termination(timeout);
        if !finished {
            log::debug!(
                "[OUTQ] '{}' send loop still running after {:?}",
                self.core.name,
                timeout
            );
        }
        self.core.channels.close_all();
        finished
    }

    pub fn stats(&self) -> OutgoingQueueStats {
        let ring = self.core.queue.stats();
        OutgoingQueueStats {
            queued: ring.added,
            evicted: ring.evicted,
            sent: self.core.sequence.load(Ordering::Relaxed),
            deliveries: self.core.deliveries.load(Ordering::Relaxed),
            latch_replays: self.core.latch_replays.load(Ordering::Relaxed),
        }
    }
}
