// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HROS - ROS 1 topic transport and master registration
//!
//! A pure Rust implementation of the ROS 1 publish/subscribe wire protocol
//! (TCPROS): connection-header handshake, length-prefixed message framing,
//! latched topics, automatic reconnect, and the registration protocol that
//! keeps the master's view of a node's publishers, subscribers, and
//! services current.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hros::concurrent::TaskExecutor;
//! use hros::message::StringCodec;
//! use hros::transport::tcp::{TcpServer, TopicDirectory};
//! use hros::transport::{advertisement, OutgoingMessageQueue};
//! use hros::{MessageDefinition, Result, TransportConfig};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let config = TransportConfig::default();
//!     let executor = TaskExecutor::new("talker", config.executor_threads)?;
//!     let definition = MessageDefinition::from_text("std_msgs/String", "string data\n");
//!
//!     // Publisher queue with its own send loop.
//!     let queue = Arc::new(OutgoingMessageQueue::new(
//!         "/chatter",
//!         Arc::new(StringCodec),
//!         &config,
//!     ));
//!     queue.start()?;
//!
//!     // Serve the topic; validated subscribers attach to the queue.
//!     let directory = Arc::new(TopicDirectory::new());
//!     let sink = Arc::clone(&queue);
//!     directory.advertise(
//!         "/chatter",
//!         advertisement("/talker", "/chatter", &definition, false),
//!         move |channel| sink.add_channel(channel),
//!     );
//!     let server = TcpServer::bind(
//!         SocketAddr::from(([0, 0, 0, 0], 0)),
//!         "/talker",
//!         directory,
//!         executor.clone(),
//!         &config,
//!     )?;
//!     server.start()?;
//!
//!     queue.put("Would you like to play a game?".to_string());
//!
//!     queue.shutdown(Duration::from_secs(5));
//!     server.shutdown(Duration::from_secs(5));
//!     executor.shutdown(Duration::from_secs(5));
//!     Ok(())
//! }
//! ```
//!
//! The master side is reached through the
//! [`MasterClient`](registration::MasterClient) trait;
//! [`Registrar`](registration::Registrar) drives it with retry and
//! listener notification.
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------------+
//! |                        Application                             |
//! |        publishers, subscribers, service endpoints              |
//! +------------------------------+---------------------------------+
//! |  Registration                |  Topic queues                   |
//! |  Registrar -> MasterClient   |  OutgoingMessageQueue (send)    |
//! |  retry + listeners           |  IncomingMessageQueue (dispatch)|
//! +------------------------------+---------------------------------+
//! |                        TCP transport                           |
//! |  TcpServer (accept) | TcpClientConnection (read + reconnect)   |
//! |          handshake -> frames -> channel group                  |
//! +----------------------------------------------------------------+
//! |                        Concurrency                             |
//! |  TaskExecutor | CancellableLoop | BoundedEvictionQueue         |
//! +----------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`OutgoingMessageQueue`](transport::OutgoingMessageQueue) | Publisher-side queue broadcasting to subscriber channels |
//! | [`IncomingMessageQueue`](transport::IncomingMessageQueue) | Subscriber-side queue dispatching to listeners |
//! | [`TcpServer`](transport::tcp::TcpServer) | Shared listener handshaking subscribers onto topics |
//! | [`TcpClientManager`](transport::tcp::TcpClientManager) | Outbound connections of one subscription |
//! | [`Registrar`](registration::Registrar) | Master registration state machine with retry |
//! | [`TransportConfig`] | Tunables: capacities, delays, size limits |
//!
//! ## Modules Overview
//!
//! - [`transport`] - Handshake, framing, queues, and the TCP layer
//! - [`registration`] - Master registration and the `MasterClient` seam
//! - [`message`] - Typed message boundary and type identity
//! - [`concurrent`] - Loops, executor, ring buffer, listener fan-out
//! - [`config`] - Centralized tunables with environment overrides

/// Concurrency primitives: loops, executor, ring buffer, listeners.
pub mod concurrent;
/// Centralized tunables and their environment overrides.
pub mod config;
/// Crate-wide error type.
pub mod error;
/// Typed message boundary and message type identity.
pub mod message;
/// Master registration of node endpoints.
pub mod registration;
/// Handshake, framing, queues, and TCP sockets.
pub mod transport;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use message::MessageDefinition;
