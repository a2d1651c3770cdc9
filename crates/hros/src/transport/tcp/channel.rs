// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP-backed message channel.
//!
//! Wraps a connected [`TcpStream`] behind the [`MessageChannel`] seam the
//! outgoing queue broadcasts through. Each payload is framed by a
//! [`FrameCodec`] and written under a writer lock, so concurrent callers
//! never interleave frames on the wire.
//!
//! `close()` works through a cloned socket handle and calls
//! `shutdown(Both)` without taking the writer lock. A blocked writer
//! observes the shutdown as a write error and the channel flips to closed.

use crate::error::{Error, Result};
use crate::transport::channel::MessageChannel;
use crate::transport::frame::FrameCodec;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Keepalive probe time for data-plane sockets.
const KEEPALIVE_TIME_SECS: u64 = 60;

/// Apply the transport's socket options to a connected stream.
///
/// `nodelay` comes from the subscriber's `tcp_nodelay` header request on
/// the accepting side and from local policy on the connecting side.
pub fn configure_stream(stream: &TcpStream, nodelay: bool) -> Result<()> {
    stream.set_nodelay(nodelay)?;
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(
        KEEPALIVE_TIME_SECS,
    )))?;
    Ok(())
}

/// One established TCP connection on the sending side.
pub struct TcpMessageChannel {
    /// Write half. One frame per lock acquisition.
    writer: Mutex<TcpStream>,
    /// Cloned handle used by `close()` so it never waits on the writer lock.
    shutdown_handle: TcpStream,
    codec: FrameCodec,
    open: AtomicBool,
    remote: String,
}

impl TcpMessageChannel {
    /// Wrap an already connected and handshaken stream.
    pub fn new(stream: TcpStream, max_frame_len: usize) -> Result<Self> {
        let remote = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "unknown".to_string(),
        };
        let shutdown_handle = stream.try_clone()?;
        Ok(Self {
            writer: Mutex::new(stream),
            shutdown_handle,
            codec: FrameCodec::new(max_frame_len),
            open: AtomicBool::new(true),
            remote,
        })
    }
}

impl MessageChannel for TcpMessageChannel {
    fn write_frame(&self, payload: &[u8]) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        let mut writer = self.writer.lock();
        match self.codec.write_frame(&mut *writer, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.open.store(false, Ordering::Release);
                log::debug!("[TCP] write to {} failed: {}", self.remote, e);
                Err(e)
            }
        }
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            log::debug!("[TCP] closing channel to {}", self.remote);
            let _ = self.shutdown_handle.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn remote_label(&self) -> String {
        self.remote.clone()
    }
}

impl Drop for TcpMessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = thread::spawn(move || listener.accept().unwrap().0);
        let client = TcpStream::connect(addr).unwrap();
        (client, accepted.join().unwrap())
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let (client, server) = loopback_pair();
        let channel = TcpMessageChannel::new(server, 1024).unwrap();
        channel.write_frame(b"one").unwrap();
        channel.write_frame(b"two").unwrap();

        let codec = FrameCodec::new(1024);
        let mut reader = client;
        assert_eq!(codec.read_frame(&mut reader).unwrap().unwrap(), b"one");
        assert_eq!(codec.read_frame(&mut reader).unwrap().unwrap(), b"two");
    }

    #[test]
    fn test_close_produces_clean_eof_for_peer() {
        let (client, server) = loopback_pair();
        let channel = TcpMessageChannel::new(server, 1024).unwrap();
        channel.write_frame(b"last").unwrap();
        channel.close();
        assert!(!channel.is_open());

        let codec = FrameCodec::new(1024);
        let mut reader = client;
        assert_eq!(codec.read_frame(&mut reader).unwrap().unwrap(), b"last");
        assert!(codec.read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let (_client, server) = loopback_pair();
        let channel = TcpMessageChannel::new(server, 1024).unwrap();
        channel.close();
        assert!(matches!(
            channel.write_frame(b"late"),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn test_write_to_dead_peer_marks_channel_closed() {
        let (client, server) = loopback_pair();
        let channel = TcpMessageChannel::new(server, 1024).unwrap();
        drop(client);
        // The first write after peer teardown may still land in the socket
        // buffer; keep writing until the failure surfaces.
        let mut failed = false;
        for _ in 0..50 {
            if channel.write_frame(b"into the void").is_err() {
                failed = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(failed);
        assert!(!channel.is_open());
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let (client, server) = loopback_pair();
        let channel = Arc::new(TcpMessageChannel::new(server, 1024).unwrap());

        let mut writers = Vec::new();
        for worker in 0..4u8 {
            let channel = Arc::clone(&channel);
            writers.push(thread::spawn(move || {
                let payload = vec![worker; 64];
                for _ in 0..25 {
                    channel.write_frame(&payload).unwrap();
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }
        channel.close();

        let codec = FrameCodec::new(1024);
        let mut reader = client;
        let mut count = 0;
        while let Some(frame) = codec.read_frame(&mut reader).unwrap() {
            assert_eq!(frame.len(), 64);
            // Every byte of a frame belongs to exactly one writer.
            assert!(frame.iter().all(|b| *b == frame[0]));
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn test_configure_stream() {
        let (client, _server) = loopback_pair();
        configure_stream(&client, true).unwrap();
        assert!(client.nodelay().unwrap());
    }
}
