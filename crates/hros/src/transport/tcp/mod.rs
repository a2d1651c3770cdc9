// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP realization of the topic transport.
//!
//! # Modules
//!
//! - `channel` - Framed writer over a connected stream, the outgoing side
//! - `client` - Subscriber connection with handshake and reconnect
//! - `manager` - Per-subscription tracking of publisher endpoints
//! - `retry` - Back-off schedule for unplanned connection loss
//! - `server` - Shared listener and topic directory, the publisher side

/// Framed message channel over a connected TCP stream.
pub mod channel;
/// Outbound subscriber connection with automatic reconnect.
pub mod client;
/// Tracking of one subscription's outbound connections.
pub mod manager;
/// Reconnect decisions and back-off timing.
pub mod retry;
/// Accepting listener and the directory of advertised topics.
pub mod server;

pub use channel::{configure_stream, TcpMessageChannel};
pub use client::{ClientConnectionStats, TcpClientConnection};
pub use manager::TcpClientManager;
pub use retry::{BackoffPolicy, ReconnectPlan, RetryingConnectionHandler};
pub use server::{ServerStats, TcpServer, TopicDirectory};
