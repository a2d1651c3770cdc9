// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher-side listener shared by every advertised topic.
//!
//! A node runs one [`TcpServer`]; subscribers for all of its topics dial
//! the same port and name the topic in their handshake request. The
//! [`TopicDirectory`] maps topic names to the advertised header and to an
//! attach hook that registers the validated channel with that topic's
//! outgoing queue.
//!
//! ```text
//!              accept loop (polls every 25ms)
//!                    |
//!             executor.execute
//!                    |
//!          serve handshake on worker
//!           /        |         \
//!       probe    validated    rejected
//!         |          |            |
//!       close    directory     close
//!                .attach
//! ```
//!
//! The accept loop never touches a client socket beyond handing it to a
//! worker, so one stalled subscriber cannot block new connections.

use crate::concurrent::{CancellableLoop, TaskExecutor};
use crate::config::{TransportConfig, ACCEPT_POLL_INTERVAL_MS};
use crate::error::{Error, Result};
use crate::transport::channel::{ChannelId, MessageChannel};
use crate::transport::handshake::{serve, HandshakeOutcome};
use crate::transport::header::ConnectionHeader;
use crate::transport::tcp::channel::{configure_stream, TcpMessageChannel};
use dashmap::DashMap;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Topic directory
// ============================================================================

type AttachFn = Box<dyn Fn(Arc<dyn MessageChannel>) -> Result<ChannelId> + Send + Sync>;

struct TopicEntry {
    header: ConnectionHeader,
    attach: AttachFn,
}

/// Topics currently advertised on this node's listener.
///
/// Handshake workers resolve topic names against this map; `advertise` and
/// `withdraw` follow the publisher lifecycle.
#[derive(Default)]
pub struct TopicDirectory {
    topics: DashMap<String, TopicEntry>,
}

impl TopicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `topic` with the header returned to subscribers and probes.
    ///
    /// `attach` receives each validated subscriber channel, typically
    /// forwarding to the topic's outgoing queue. Re-advertising a topic
    /// replaces the previous entry.
    pub fn advertise<F>(&self, topic: &str, header: ConnectionHeader, attach: F)
    where
        F: Fn(Arc<dyn MessageChannel>) -> Result<ChannelId> + Send + Sync + 'static,
    {
        log::debug!("[TCP] advertising topic '{}'", topic);
        self.topics.insert(
            topic.to_string(),
            TopicEntry {
                header,
                attach: Box::new(attach),
            },
        );
    }

    /// Stop serving `topic`. Existing subscriber channels stay attached.
    pub fn withdraw(&self, topic: &str) -> bool {
        let removed = self.topics.remove(topic).is_some();
        if removed {
            log::debug!("[TCP] withdrew topic '{}'", topic);
        }
        removed
    }

    /// Header advertised for `topic`, if it is being served.
    pub fn header_for(&self, topic: &str) -> Option<ConnectionHeader> {
        self.topics.get(topic).map(|entry| entry.header.clone())
    }

    /// Hand a validated channel to the topic's attach hook.
    pub fn attach(&self, topic: &str, channel: Arc<dyn MessageChannel>) -> Result<ChannelId> {
        match self.topics.get(topic) {
            Some(entry) => (entry.attach)(channel),
            None => Err(Error::UnknownTopic(topic.to_string())),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Counters for the listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u64,
    pub validated: u64,
    pub probes: u64,
    pub handshake_failures: u64,
}

struct ServerShared {
    caller_id: String,
    directory: Arc<TopicDirectory>,
    executor: TaskExecutor,
    max_header_len: usize,
    max_frame_len: usize,
    accepted: AtomicU64,
    validated: AtomicU64,
    probes: AtomicU64,
    handshake_failures: AtomicU64,
}

/// Accepting end of the topic transport.
pub struct TcpServer {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    accept_loop: Mutex<CancellableLoop>,
}

impl TcpServer {
    /// Bind `bind_addr` and prepare the accept loop.
    ///
    /// Binding to port 0 picks an ephemeral port; the bound address is
    /// available through [`TcpServer::local_addr`] before `start`.
    pub fn bind(
        bind_addr: SocketAddr,
        caller_id: &str,
        directory: Arc<TopicDirectory>,
        executor: TaskExecutor,
        config: &TransportConfig,
    ) -> Result<Self> {
        let socket = Socket::new(
            Domain::for_address(bind_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();
        // Nonblocking accept lets the loop observe cancellation between polls.
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        log::info!("[TCP] listening on {}", local_addr);

        let shared = Arc::new(ServerShared {
            caller_id: caller_id.to_string(),
            directory,
            executor,
            max_header_len: config.max_header_len,
            max_frame_len: config.max_frame_len,
            accepted: AtomicU64::new(0),
            validated: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
        });
        let loop_shared = Arc::clone(&shared);
        let poll_interval = Duration::from_millis(ACCEPT_POLL_INTERVAL_MS);
        let accept_loop = CancellableLoop::new(
            &format!("hros-accept-{}", local_addr.port()),
            move || {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        loop_shared.accepted.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[TCP] accepted connection from {}", peer);
                        let worker_shared = Arc::clone(&loop_shared);
                        loop_shared
                            .executor
                            .execute(move || handle_client(&worker_shared, stream, peer));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(poll_interval);
                    }
                    Err(e) => {
                        log::warn!("[TCP] accept failed: {}", e);
                        thread::sleep(poll_interval);
                    }
                }
                true
            },
        );

        Ok(Self {
            shared,
            local_addr,
            accept_loop: Mutex::new(accept_loop),
        })
    }

    /// Start accepting connections.
    pub fn start(&self) -> Result<()> {
        self.accept_loop.lock().start()
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Channels already handed to topic queues are unaffected. Returns
    /// `false` if the accept loop did not wind down within `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let mut accept_loop = self.accept_loop.lock();
        accept_loop.cancel();
        accept_loop.await_termination(timeout)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address to hand to the master during registration.
    ///
    /// When bound to a wildcard IP, the host's routable address is
    /// substituted so remote subscribers receive something dialable.
    pub fn advertise_address(&self) -> SocketAddr {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            let ip = local_ip_address::local_ip()
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            addr.set_ip(ip);
        }
        addr
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            accepted: self.shared.accepted.load(Ordering::Relaxed),
            validated: self.shared.validated.load(Ordering::Relaxed),
            probes: self.shared.probes.load(Ordering::Relaxed),
            handshake_failures: self.shared.handshake_failures.load(Ordering::Relaxed),
        }
    }
}

/// Handshake one accepted connection. Runs on an executor worker.
fn handle_client(shared: &Arc<ServerShared>, mut stream: TcpStream, peer: SocketAddr) {
    // The stream inherits nonblocking mode from the listener.
    if let Err(e) = stream.set_nonblocking(false) {
        log::warn!("[TCP] could not configure connection from {}: {}", peer, e);
        return;
    }
    let directory = Arc::clone(&shared.directory);
    let outcome = serve(&mut stream, &shared.caller_id, shared.max_header_len, |topic| {
        directory.header_for(topic)
    });
    match outcome {
        Ok(HandshakeOutcome::Validated {
            topic,
            subscriber,
            nodelay,
        }) => {
            let attached = configure_stream(&stream, nodelay)
                .and_then(|()| TcpMessageChannel::new(stream, shared.max_frame_len))
                .and_then(|channel| shared.directory.attach(&topic, Arc::new(channel)));
            match attached {
                Ok(id) => {
                    shared.validated.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "[TCP] subscriber '{}' ({}) attached to '{}' as {}",
                        subscriber,
                        peer,
                        topic,
                        id
                    );
                }
                Err(e) => {
                    shared.handshake_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[TCP] could not attach subscriber '{}' to '{}': {}",
                        subscriber,
                        topic,
                        e
                    );
                }
            }
        }
        Ok(HandshakeOutcome::ProbeAcknowledged { topic }) => {
            shared.probes.fetch_add(1, Ordering::Relaxed);
            log::debug!("[TCP] answered probe from {} for '{}'", peer, topic);
        }
        Err(e) => {
            shared.handshake_failures.fetch_add(1, Ordering::Relaxed);
            log::debug!("[TCP] handshake from {} failed: {}", peer, e);
        }
    }
}
