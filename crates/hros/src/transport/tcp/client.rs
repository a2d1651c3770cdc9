// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound topic connection with automatic reconnect.
//!
//! A subscriber opens one [`TcpClientConnection`] per publisher endpoint.
//! `connect` dials with a timeout, runs the client handshake, and starts a
//! reader loop that feeds every arriving frame into the subscriber's
//! [`FrameReceiver`]. The receiver outlives individual sockets, so frames
//! arriving after a reconnect land in the same incoming queue and a
//! latching publisher replays its last message across the gap.
//!
//! ```text
//! connect --> dial --> handshake --> reader loop --> FrameReceiver
//!               ^                        |
//!               |        unplanned close |
//!               '--- schedule_after <-- RetryingConnectionHandler
//! ```
//!
//! `disconnect` disarms the retry handler before shutting the socket down,
//! so the reader observing the shutdown stays quiet instead of scheduling
//! another attempt.

use crate::concurrent::{CancellableLoop, TaskExecutor};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::message::MessageDefinition;
use crate::transport::frame::FrameCodec;
use crate::transport::handshake::ClientHandshake;
use crate::transport::header::ConnectionHeader;
use crate::transport::incoming::FrameReceiver;
use crate::transport::tcp::channel::configure_stream;
use crate::transport::tcp::retry::{BackoffPolicy, ReconnectPlan, RetryingConnectionHandler};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Socket and reader loop of the currently live session.
#[derive(Default)]
struct LiveConnection {
    stream: Option<TcpStream>,
    reader: Option<CancellableLoop>,
}

/// Counters for one client connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientConnectionStats {
    /// Successful connects, reconnects included.
    pub connects: u64,
    /// Dial or handshake failures.
    pub connect_failures: u64,
    /// Closures not preceded by a disconnect request.
    pub unplanned_closes: u64,
}

/// One subscriber-to-publisher connection.
///
/// Constructed as an `Arc`; the reader loop holds only a `Weak` reference
/// back, so dropping the last handle tears the connection down.
pub struct TcpClientConnection {
    topic: String,
    caller_id: String,
    definition: MessageDefinition,
    nodelay: bool,
    receiver: FrameReceiver,
    executor: TaskExecutor,
    retry: RetryingConnectionHandler,
    live: Mutex<LiveConnection>,
    closed: AtomicBool,
    peer_header: ArcSwapOption<ConnectionHeader>,
    connect_timeout: Duration,
    max_header_len: usize,
    max_frame_len: usize,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    unplanned_closes: AtomicU64,
}

impl TcpClientConnection {
    pub fn new(
        caller_id: &str,
        topic: &str,
        definition: MessageDefinition,
        nodelay: bool,
        receiver: FrameReceiver,
        executor: TaskExecutor,
        config: &TransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            caller_id: caller_id.to_string(),
            definition,
            nodelay,
            receiver,
            executor,
            retry: RetryingConnectionHandler::new(BackoffPolicy::from_config(config)),
            live: Mutex::new(LiveConnection::default()),
            closed: AtomicBool::new(false),
            peer_header: ArcSwapOption::const_empty(),
            connect_timeout: config.connect_timeout,
            max_header_len: config.max_header_len,
            max_frame_len: config.max_frame_len,
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            unplanned_closes: AtomicU64::new(0),
        })
    }

    /// Dial `remote`, run the handshake, and start the reader loop.
    ///
    /// The initial attempt reports failure to the caller; once connected,
    /// an unplanned closure reconnects with back-off until
    /// [`TcpClientConnection::disconnect`].
    pub fn connect(self: &Arc<Self>, remote: SocketAddr) -> Result<()> {
        self.retry.connect_requested(remote);
        self.attempt_connect(remote, false)
    }

    /// Deliberately close the connection and join the reader loop.
    ///
    /// Returns `false` if the reader did not wind down within `timeout`.
    /// Idempotent; later calls return `true` immediately.
    pub fn disconnect(&self, timeout: Duration) -> bool {
        self.retry.disconnect_requested();
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        log::debug!("[TCP] '{}' disconnecting", self.topic);
        let (stream, reader) = {
            let mut live = self.live.lock();
            (live.stream.take(), live.reader.take())
        };
        if let Some(stream) = &stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        match reader {
            Some(mut reader) => {
                reader.cancel();
                reader.await_termination(timeout)
            }
            None => true,
        }
    }

    /// True while a reader loop is consuming frames from a live socket.
    pub fn is_connected(&self) -> bool {
        self.live
            .lock()
            .reader
            .as_ref()
            .map(|r| r.is_running())
            .unwrap_or(false)
    }

    /// Header the publisher returned in the latest successful handshake.
    pub fn peer_header(&self) -> Option<Arc<ConnectionHeader>> {
        self.peer_header.load_full()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> ClientConnectionStats {
        ClientConnectionStats {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            unplanned_closes: self.unplanned_closes.load(Ordering::Relaxed),
        }
    }

    /// One connect attempt with bookkeeping. `replace` marks the internal
    /// reconnect path, which may displace the previous, finished reader.
    fn attempt_connect(self: &Arc<Self>, remote: SocketAddr, replace: bool) -> Result<()> {
        match self.try_connect(remote, replace) {
            Ok(()) => {
                self.connects.fetch_add(1, Ordering::Relaxed);
                self.retry.connected();
                log::info!("[TCP] '{}' connected to {}", self.topic, remote);
                Ok(())
            }
            Err(e) => {
                self.connect_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn try_connect(self: &Arc<Self>, remote: SocketAddr, replace: bool) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        if !replace && self.is_connected() {
            return Err(Error::InvalidState(format!(
                "connection for '{}' is already established",
                self.topic
            )));
        }

        let mut stream = dial(remote, self.connect_timeout)?;
        configure_stream(&stream, self.nodelay)?;

        let mut handshake = ClientHandshake::subscriber(
            &self.caller_id,
            &self.topic,
            &self.definition,
            self.nodelay,
        );
        let response = handshake.execute(&mut stream, self.max_header_len)?;
        handshake.mark_data();
        self.peer_header.store(Some(Arc::new(response)));

        let reader = self.spawn_reader(&stream)?;

        let mut live = self.live.lock();
        if self.closed.load(Ordering::Acquire) {
            // Disconnect raced with this attempt; tear the session down.
            drop(live);
            drop(reader);
            let _ = stream.shutdown(Shutdown::Both);
            return Err(Error::ChannelClosed);
        }
        let previous_stream = live.stream.take();
        let previous_reader = live.reader.take();
        live.stream = Some(stream);
        live.reader = Some(reader);
        drop(live);
        // The displaced reader has already left its body; joining it here
        // is quick and happens outside the lock.
        drop(previous_reader);
        drop(previous_stream);
        Ok(())
    }

    /// Build and start the loop that pumps frames into the receiver.
    fn spawn_reader(self: &Arc<Self>, stream: &TcpStream) -> Result<CancellableLoop> {
        let mut reader_stream = stream.try_clone()?;
        let hook_stream = stream.try_clone()?;
        let codec = FrameCodec::new(self.max_frame_len);
        let receiver = self.receiver.clone();
        let weak = Arc::downgrade(self);
        let topic = self.topic.clone();
        let mut reader = CancellableLoop::new(&format!("hros-read-{}", self.topic), move || {
            match codec.read_frame(&mut reader_stream) {
                Ok(Some(frame)) => {
                    receiver.push(frame);
                    true
                }
                Ok(None) => {
                    log::debug!("[TCP] '{}' peer closed the connection", topic);
                    notify_closed(&weak);
                    false
                }
                Err(e) => {
                    log::warn!("[TCP] '{}' read failed: {}", topic, e);
                    notify_closed(&weak);
                    false
                }
            }
        })
        .with_interrupt(move || {
            let _ = hook_stream.shutdown(Shutdown::Both);
        });
        reader.start()?;
        Ok(reader)
    }

    /// Reader loop saw the stream end. Runs on the reader thread.
    fn on_reader_closed(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.unplanned_closes.fetch_add(1, Ordering::Relaxed);
        if let Some(plan) = self.retry.channel_closed() {
            let conn = Arc::clone(self);
            self.executor.schedule_after(plan.delay, move || {
                conn.attempt_reconnect(plan);
            });
        }
    }

    /// Scheduled reconnect attempt. Runs on an executor worker.
    fn attempt_reconnect(self: &Arc<Self>, plan: ReconnectPlan) {
        if self.closed.load(Ordering::Acquire) || !self.retry.will_reconnect() {
            return;
        }
        log::info!(
            "[TCP] '{}' reconnecting to {} (attempt {})",
            self.topic,
            plan.remote,
            plan.attempt
        );
        if let Err(e) = self.attempt_connect(plan.remote, true) {
            log::warn!(
                "[TCP] '{}' reconnect to {} failed: {}",
                self.topic,
                plan.remote,
                e
            );
            if let Some(next) = self.retry.channel_closed() {
                let conn = Arc::clone(self);
                self.executor.schedule_after(next.delay, move || {
                    conn.attempt_reconnect(next);
                });
            }
        }
    }
}

fn notify_closed(conn: &Weak<TcpClientConnection>) {
    if let Some(conn) = conn.upgrade() {
        conn.on_reader_closed();
    }
}

/// Dial with the configured timeout.
fn dial(remote: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    match TcpStream::connect_timeout(&remote, timeout) {
        Ok(stream) => Ok(stream),
        Err(e) if e.kind() == ErrorKind::TimedOut => {
            Err(Error::ConnectTimeout(remote.to_string()))
        }
        Err(e) => Err(Error::from(e)),
    }
}
