// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel abstraction and fan-out group.
//!
//! A [`MessageChannel`] is one established, handshaken destination for
//! frames. The [`ChannelGroup`] is the set of destinations an outgoing
//! queue broadcasts to; it is mutated from handshake threads (add) and
//! from the send loop (removal of dead channels), so it sits on a
//! concurrent map rather than a lock around a plain set.

use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One established destination for outgoing frames.
pub trait MessageChannel: Send + Sync {
    /// Write one framed payload. Blocking; an error marks the channel dead.
    fn write_frame(&self, payload: &[u8]) -> Result<()>;

    /// Close the underlying resource. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Short peer description for log lines.
    fn remote_label(&self) -> String;
}

/// Handle to a channel registered in a [`ChannelGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Concurrent set of live channels with broadcast and failure isolation.
#[derive(Default)]
pub struct ChannelGroup {
    channels: DashMap<u64, Arc<dyn MessageChannel>>,
    next_id: AtomicU64,
}

impl ChannelGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and return its handle.
    pub fn add(&self, channel: Arc<dyn MessageChannel>) -> ChannelId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("[TCP] channel {} added: {}", ChannelId(id), channel.remote_label());
        self.channels.insert(id, channel);
        ChannelId(id)
    }

    /// Unregister a channel without closing it.
    pub fn remove(&self, id: ChannelId) -> Option<Arc<dyn MessageChannel>> {
        self.channels.remove(&id.0).map(|(_, channel)| channel)
    }

    /// Write `payload` to every channel.
    ///
    /// A channel that errors is closed and dropped from the group; the
    /// remaining channels still receive the payload. Returns the number of
    /// successful deliveries.
    pub fn write_all(&self, payload: &[u8]) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.channels.iter() {
            match entry.value().write_frame(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::debug!(
                        "[TCP] dropping channel {} ({}): {}",
                        ChannelId(*entry.key()),
                        entry.value().remote_label(),
                        e
                    );
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            if let Some((_, channel)) = self.channels.remove(&id) {
                channel.close();
            }
        }
        delivered
    }

    /// Close every channel and empty the group.
    pub fn close_all(&self) {
        self.channels.retain(|id, channel| {
            log::debug!(
                "[TCP] closing channel {}: {}",
                ChannelId(*id),
                channel.remote_label()
            );
            channel.close();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
