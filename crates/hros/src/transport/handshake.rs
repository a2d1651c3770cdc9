// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection handshake protocol.
//!
//! Both ends exchange one connection header before any frame flows:
//!
//! ```text
//!              client                          server
//!         INIT   |                               | INIT
//!                |------- request header ------->|
//!  HEADER_SENT   |                               | HEADER_RECEIVED
//!                |<------ response header -------|
//!    VALIDATED   |                               | VALIDATED
//!                |........... frames ...........>|
//!         DATA   |                               | DATA
//! ```
//!
//! Either side moves to FAILED instead when validation fails. The server
//! answers a failing request with a header carrying an `error` field before
//! closing, so the peer learns why instead of seeing a bare reset.
//!
//! A request carrying `probe=1` receives the response header and nothing
//! else. That is the third outcome next to success and failure: the probing
//! client wanted type and checksum info without opening a data stream, so
//! no channel is registered and the connection closes.

use crate::error::{Error, Result};
use crate::message::MessageDefinition;
use crate::transport::header::{fields, ConnectionHeader, WILDCARD};
use std::io::{Read, Write};

// ============================================================================
// Handshake state
// ============================================================================

/// Progress of one handshake, client or server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    /// Client wrote its request header, response pending.
    HeaderSent,
    /// Server decoded the incoming request header.
    HeaderReceived,
    /// Headers exchanged and compatible.
    Validated,
    /// Frames are flowing.
    Data,
    Failed,
}

impl HandshakeState {
    pub fn is_validated(&self) -> bool {
        matches!(self, HandshakeState::Validated | HandshakeState::Data)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HandshakeState::Failed)
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeState::Init => write!(f, "INIT"),
            HandshakeState::HeaderSent => write!(f, "HEADER_SENT"),
            HandshakeState::HeaderReceived => write!(f, "HEADER_RECEIVED"),
            HandshakeState::Validated => write!(f, "VALIDATED"),
            HandshakeState::Data => write!(f, "DATA"),
            HandshakeState::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Subscriber-side handshake for one topic connection.
pub struct ClientHandshake {
    outgoing: ConnectionHeader,
    expected: MessageDefinition,
    state: HandshakeState,
}

impl ClientHandshake {
    /// Build the request a subscriber sends to a publisher.
    pub fn subscriber(
        caller_id: &str,
        topic: &str,
        definition: &MessageDefinition,
        tcp_nodelay: bool,
    ) -> Self {
        let mut outgoing = ConnectionHeader::new();
        outgoing
            .insert(fields::CALLER_ID, caller_id)
            .insert(fields::TOPIC, topic)
            .insert(fields::TYPE, definition.type_name())
            .insert(fields::MD5_SUM, definition.md5_checksum())
            .insert(fields::TCP_NODELAY, if tcp_nodelay { "1" } else { "0" });
        Self {
            outgoing,
            expected: definition.clone(),
            state: HandshakeState::Init,
        }
    }

    /// Probe request: response header wanted, no data stream.
    pub fn probe(caller_id: &str, topic: &str) -> Self {
        let mut outgoing = ConnectionHeader::new();
        outgoing
            .insert(fields::CALLER_ID, caller_id)
            .insert(fields::TOPIC, topic)
            .insert(fields::TYPE, WILDCARD)
            .insert(fields::MD5_SUM, WILDCARD)
            .insert(fields::PROBE, "1");
        Self {
            outgoing,
            expected: MessageDefinition::new(WILDCARD, WILDCARD, ""),
            state: HandshakeState::Init,
        }
    }

    pub fn outgoing_header(&self) -> &ConnectionHeader {
        &self.outgoing
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Mark the connection as carrying frames; called once the reader
    /// loop takes over the stream.
    pub fn mark_data(&mut self) {
        if self.state == HandshakeState::Validated {
            self.state = HandshakeState::Data;
        }
    }

    /// Run the exchange over `stream` and return the peer's header.
    pub fn execute<S: Read + Write>(
        &mut self,
        stream: &mut S,
        max_header_len: usize,
    ) -> Result<ConnectionHeader> {
        match self.try_execute(stream, max_header_len) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    fn try_execute<S: Read + Write>(
        &mut self,
        stream: &mut S,
        max_header_len: usize,
    ) -> Result<ConnectionHeader> {
        self.outgoing.write_to(stream)?;
        stream.flush()?;
        self.state = HandshakeState::HeaderSent;
        log::debug!("[HANDSHAKE] sent request: {}", self.outgoing);

        let response = ConnectionHeader::read_from(stream, max_header_len)?;
        log::debug!("[HANDSHAKE] received response: {}", response);
        self.validate(&response)?;
        self.state = HandshakeState::Validated;
        Ok(response)
    }

    /// Check the peer's response against the expected definition.
    fn validate(&self, response: &ConnectionHeader) -> Result<()> {
        if let Some(reason) = response.get(fields::ERROR) {
            return Err(Error::HandshakeRejected(reason.to_string()));
        }
        let received_type = response.require(fields::TYPE)?;
        if !wildcard_match(self.expected.type_name(), received_type) {
            return Err(Error::TypeMismatch {
                expected: self.expected.type_name().to_string(),
                received: received_type.to_string(),
            });
        }
        let received_md5 = response.require(fields::MD5_SUM)?;
        if !wildcard_match(self.expected.md5_checksum(), received_md5) {
            return Err(Error::ChecksumMismatch {
                expected: self.expected.md5_checksum().to_string(),
                received: received_md5.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Header a publisher advertises for one topic.
///
/// The server returns it to validated subscribers and to probes; its
/// `type` and `md5sum` fields are what incoming requests are validated
/// against.
pub fn advertisement(
    caller_id: &str,
    topic: &str,
    definition: &MessageDefinition,
    latching: bool,
) -> ConnectionHeader {
    let mut header = ConnectionHeader::new();
    header
        .insert(fields::CALLER_ID, caller_id)
        .insert(fields::TOPIC, topic)
        .insert(fields::TYPE, definition.type_name())
        .insert(fields::MD5_SUM, definition.md5_checksum())
        .insert(fields::LATCHING, if latching { "1" } else { "0" })
        .insert(fields::MESSAGE_DEFINITION, definition.definition_text());
    header
}

/// Result of a completed server-side handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Compatible subscriber; register its channel for the topic.
    Validated {
        topic: String,
        subscriber: String,
        nodelay: bool,
    },
    /// Probe answered with the response header; close without a channel.
    ProbeAcknowledged { topic: String },
}

/// Serve one incoming handshake on `stream`.
///
/// `lookup` maps a topic name to the local publisher's advertised header
/// (type, checksum, latching, definition text). On any failure a header
/// carrying an `error` field is written before the error is returned, and
/// the caller closes the stream.
pub fn serve<S, F>(
    stream: &mut S,
    caller_id: &str,
    max_header_len: usize,
    lookup: F,
) -> Result<HandshakeOutcome>
where
    S: Read + Write,
    F: FnOnce(&str) -> Option<ConnectionHeader>,
{
    let request = ConnectionHeader::read_from(stream, max_header_len)?;
    log::debug!("[HANDSHAKE] received request: {}", request);

    if let Some(service) = request.get(fields::SERVICE) {
        let service = service.to_string();
        reject(stream, caller_id, "this node does not provide services");
        return Err(Error::UnknownTopic(service));
    }
    let topic = match request.require(fields::TOPIC) {
        Ok(topic) => topic.to_string(),
        Err(e) => {
            reject(stream, caller_id, "request header is missing the topic field");
            return Err(e);
        }
    };
    let local = match lookup(&topic) {
        Some(local) => local,
        None => {
            reject(
                stream,
                caller_id,
                &format!("no publisher for topic [{}]", topic),
            );
            return Err(Error::UnknownTopic(topic));
        }
    };

    if request.flag(fields::PROBE) {
        local.write_to(stream)?;
        stream.flush()?;
        log::debug!("[HANDSHAKE] probe acknowledged for topic '{}'", topic);
        return Ok(HandshakeOutcome::ProbeAcknowledged { topic });
    }

    if let Err(e) = validate_request(&request, &local) {
        reject(stream, caller_id, &e.to_string());
        return Err(e);
    }

    local.write_to(stream)?;
    stream.flush()?;
    let subscriber = request.get(fields::CALLER_ID).unwrap_or("").to_string();
    let nodelay = request.flag(fields::TCP_NODELAY);
    log::debug!(
        "[HANDSHAKE] validated subscriber '{}' on topic '{}'",
        subscriber,
        topic
    );
    Ok(HandshakeOutcome::Validated {
        topic,
        subscriber,
        nodelay,
    })
}

/// Compare the request's type and checksum against the local header.
fn validate_request(request: &ConnectionHeader, local: &ConnectionHeader) -> Result<()> {
    let local_type = local.require(fields::TYPE)?;
    let requested_type = request.require(fields::TYPE)?;
    if !wildcard_match(requested_type, local_type) {
        return Err(Error::TypeMismatch {
            expected: local_type.to_string(),
            received: requested_type.to_string(),
        });
    }
    let local_md5 = local.require(fields::MD5_SUM)?;
    let requested_md5 = request.require(fields::MD5_SUM)?;
    if !wildcard_match(requested_md5, local_md5) {
        return Err(Error::ChecksumMismatch {
            expected: local_md5.to_string(),
            received: requested_md5.to_string(),
        });
    }
    Ok(())
}

/// Best-effort error response; the connection is closing anyway.
fn reject<S: Read + Write>(stream: &mut S, caller_id: &str, reason: &str) {
    log::debug!("[HANDSHAKE] rejecting: {}", reason);
    let mut response = ConnectionHeader::new();
    response
        .insert(fields::ERROR, reason)
        .insert(fields::CALLER_ID, caller_id);
    if response.write_to(stream).is_err() {
        log::debug!("[HANDSHAKE] peer gone before rejection could be sent");
    }
    let _ = stream.flush();
}

/// Equal, or either side is `*`.
fn wildcard_match(a: &str, b: &str) -> bool {
    a == b || a == WILDCARD || b == WILDCARD
}
