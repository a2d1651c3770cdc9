// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic transport: connection headers, framing, and message queues.
//!
//! The transport moves opaque payload bytes between a publisher and its
//! subscribers. A connection starts with a header handshake that names the
//! topic and proves type compatibility, then switches to a stream of
//! length-prefixed frames.
//!
//! ```text
//!  publisher                                      subscriber
//!  OutgoingMessageQueue                     IncomingMessageQueue
//!     |  serialize + broadcast                 ^  deserialize + dispatch
//!     v                                        |
//!  ChannelGroup --frames--> [TCP] --frames--> FrameReceiver
//!     ^                                        ^
//!     | attach on validated handshake          | push from reader loop
//!  TcpServer                              TcpClientConnection
//! ```
//!
//! # Modules
//!
//! - `header` - Connection header fields and wire codec
//! - `frame` - Length-prefixed payload framing
//! - `handshake` - Client and server header exchange with validation
//! - `channel` - Channel trait and broadcast group
//! - `outgoing` - Publisher-side queue with latching and eviction
//! - `incoming` - Subscriber-side queue with listener dispatch
//! - `tcp` - Sockets: listener, client connection, reconnect

/// Channel abstraction and fan-out group.
pub mod channel;
/// Length-prefixed payload framing.
pub mod frame;
/// Connection establishment and validation.
pub mod handshake;
/// Connection header representation and codec.
pub mod header;
/// Subscriber-side incoming queue and dispatch.
pub mod incoming;
/// Publisher-side outgoing queue and broadcast.
pub mod outgoing;
/// TCP listener, client connection, and reconnect policy.
pub mod tcp;

pub use channel::{ChannelGroup, ChannelId, MessageChannel};
pub use frame::FrameCodec;
pub use handshake::{advertisement, serve, ClientHandshake, HandshakeOutcome, HandshakeState};
pub use header::{fields, ConnectionHeader};
pub use incoming::{FrameReceiver, IncomingMessageQueue, IncomingQueueStats, MessageListener};
pub use outgoing::{OutgoingMessageQueue, OutgoingQueueStats};
