// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracking of a subscriber's outbound connections.
//!
//! One manager exists per subscription and owns a [`TcpClientConnection`]
//! for every publisher endpoint the topic currently has. Publisher lists
//! arrive repeatedly (every update from the master carries the full set),
//! so `connect` treats an already-tracked endpoint as a no-op instead of
//! opening a second socket to the same publisher.

use crate::config::TransportConfig;
use crate::error::Result;
use crate::message::MessageDefinition;
use crate::transport::incoming::FrameReceiver;
use crate::transport::tcp::client::TcpClientConnection;
use crate::concurrent::TaskExecutor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// All outbound connections of one subscription.
pub struct TcpClientManager {
    caller_id: String,
    topic: String,
    definition: MessageDefinition,
    nodelay: bool,
    receiver: FrameReceiver,
    executor: TaskExecutor,
    config: TransportConfig,
    connections: DashMap<SocketAddr, Arc<TcpClientConnection>>,
}

impl TcpClientManager {
    pub fn new(
        caller_id: &str,
        topic: &str,
        definition: MessageDefinition,
        nodelay: bool,
        receiver: FrameReceiver,
        executor: TaskExecutor,
        config: &TransportConfig,
    ) -> Self {
        Self {
            caller_id: caller_id.to_string(),
            topic: topic.to_string(),
            definition,
            nodelay,
            receiver,
            executor,
            config: config.clone(),
            connections: DashMap::new(),
        }
    }

    /// Connect to the publisher at `remote` unless already tracked.
    ///
    /// The initial attempt's failure is returned and the endpoint is not
    /// tracked; a tracked connection reconnects on its own afterwards.
    pub fn connect(&self, remote: SocketAddr) -> Result<()> {
        if self.connections.contains_key(&remote) {
            log::debug!("[TCP] '{}' already connected to {}", self.topic, remote);
            return Ok(());
        }
        let conn = TcpClientConnection::new(
            &self.caller_id,
            &self.topic,
            self.definition.clone(),
            self.nodelay,
            self.receiver.clone(),
            self.executor.clone(),
            &self.config,
        );
        conn.connect(remote)?;
        match self.connections.entry(remote) {
            Entry::Occupied(_) => {
                // A concurrent connect to the same endpoint won; keep it.
                conn.disconnect(self.config.shutdown_wait);
            }
            Entry::Vacant(slot) => {
                slot.insert(conn);
            }
        }
        Ok(())
    }

    /// Disconnect from `remote` and stop tracking it.
    ///
    /// Returns `false` if the endpoint was not tracked or its reader did
    /// not wind down within `timeout`.
    pub fn disconnect(&self, remote: SocketAddr, timeout: Duration) -> bool {
        match self.connections.remove(&remote) {
            Some((_, conn)) => conn.disconnect(timeout),
            None => false,
        }
    }

    /// Disconnect every tracked endpoint.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let mut finished = true;
        let remotes: Vec<SocketAddr> =
            self.connections.iter().map(|entry| *entry.key()).collect();
        for remote in remotes {
            if let Some((_, conn)) = self.connections.remove(&remote) {
                finished &= conn.disconnect(timeout);
            }
        }
        finished
    }

    pub fn is_tracking(&self, remote: &SocketAddr) -> bool {
        self.connections.contains_key(remote)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Look up the tracked connection for inspection.
    pub fn connection(&self, remote: &SocketAddr) -> Option<Arc<TcpClientConnection>> {
        self.connections
            .get(remote)
            .map(|entry| Arc::clone(entry.value()))
    }
}
