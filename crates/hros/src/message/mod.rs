// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed message boundary of the transport.
//!
//! The transport moves opaque payload byte vectors; these traits sit at the
//! edges and convert between payloads and typed messages. Publishers hand an
//! [`MessageSerializer`] to their outgoing queue, subscribers hand a
//! [`MessageDeserializer`] to their incoming queue's dispatch loop.
//!
//! # Modules
//!
//! - `definition` - Message type identity (name, checksum, definition text)

pub mod definition;

pub use definition::MessageDefinition;

use crate::error::{Error, Result};

/// Convert a typed message into transport payload bytes.
///
/// Serialization targets an in-memory buffer and cannot fail; codecs for
/// types with unrepresentable states should reject those at construction.
pub trait MessageSerializer<M>: Send + Sync {
    /// Append the serialized form of `message` to `out`.
    fn serialize(&self, message: &M, out: &mut Vec<u8>);
}

/// Convert transport payload bytes back into a typed message.
pub trait MessageDeserializer<M>: Send + Sync {
    fn deserialize(&self, payload: &[u8]) -> Result<M>;
}

/// Codec for single-field string messages.
///
/// Wire form is a little-endian `u32` byte count followed by UTF-8 bytes,
/// with no trailing terminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl MessageSerializer<String> for StringCodec {
    fn serialize(&self, message: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(&(message.len() as u32).to_le_bytes());
        out.extend_from_slice(message.as_bytes());
    }
}

impl MessageDeserializer<String> for StringCodec {
    fn deserialize(&self, payload: &[u8]) -> Result<String> {
        if payload.len() < 4 {
            return Err(Error::Deserialization(format!(
                "string payload too short: {} bytes",
                payload.len()
            )));
        }
        let declared = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let body = &payload[4..];
        if body.len() != declared {
            return Err(Error::Deserialization(format!(
                "string length {} does not match remaining {} bytes",
                declared,
                body.len()
            )));
        }
        String::from_utf8(body.to_vec())
            .map_err(|e| Error::Deserialization(format!("string is not UTF-8: {}", e)))
    }
}
