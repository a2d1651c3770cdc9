// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection header codec.
//!
//! The first bytes exchanged on every transport connection form a header of
//! `key=value` fields:
//!
//! ```text
//! u32 total          length of everything after this prefix
//!   u32 field        length of "key=value" (key + '=' + value)
//!   "key=value"
//!   u32 field
//!   "key=value"
//!   ...
//! ```
//!
//! All length prefixes are little-endian. A zero-length field and a field
//! without `=` are both fatal decode errors; anything else decodes, with
//! duplicate keys collapsing to the last occurrence.

use crate::error::{Error, Result};
use std::io::{Read, Write};

// ============================================================================
// Well-known field names
// ============================================================================

/// Header field names with meaning to the transport.
pub mod fields {
    /// Node name of the connecting side.
    pub const CALLER_ID: &str = "callerid";
    /// Topic the subscriber asks for.
    pub const TOPIC: &str = "topic";
    /// Message type checksum, or `*` to accept any.
    pub const MD5_SUM: &str = "md5sum";
    /// Package-qualified message type, or `*` to accept any.
    pub const TYPE: &str = "type";
    /// Service the client asks for.
    pub const SERVICE: &str = "service";
    /// Subscriber requests Nagle off when `1`.
    pub const TCP_NODELAY: &str = "tcp_nodelay";
    /// Publisher replays its last message to new subscribers when `1`.
    pub const LATCHING: &str = "latching";
    /// Service client keeps the connection across calls when `1`.
    pub const PERSISTENT: &str = "persistent";
    /// Full message definition text.
    pub const MESSAGE_DEFINITION: &str = "message_definition";
    /// Human-readable rejection reason sent before closing.
    pub const ERROR: &str = "error";
    /// Client only wants the response header, no data exchange.
    pub const PROBE: &str = "probe";
}

/// Wildcard value accepted for type and checksum fields.
pub const WILDCARD: &str = "*";

// ============================================================================
// ConnectionHeader
// ============================================================================

/// Ordered set of `key=value` fields exchanged during handshakes.
///
/// Insertion order is preserved on the wire; equality ignores it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHeader {
    entries: Vec<(String, String)>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any existing entry in place.
    pub fn insert(&mut self, key: &str, value: &str) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
        self
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key`, or an error naming the missing field.
    pub fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(Error::MissingHeaderField(key))
    }

    /// True when `key` holds the literal `1`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Copy every field of `other` into this header, overwriting clashes.
    pub fn merge(&mut self, other: &ConnectionHeader) {
        for (key, value) in &other.entries {
            self.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ------------------------------------------------------------------
    // Wire codec
    // ------------------------------------------------------------------

    /// Encode as a full header block, total-length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (key, value) in &self.entries {
            let field_len = (key.len() + 1 + value.len()) as u32;
            body.extend_from_slice(&field_len.to_le_bytes());
            body.extend_from_slice(key.as_bytes());
            body.push(b'=');
            body.extend_from_slice(value.as_bytes());
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decode a header block from the front of `buf`.
    ///
    /// Returns the header and the number of bytes consumed; trailing bytes
    /// are left for the caller.
    pub fn decode(buf: &[u8], max_len: usize) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::Truncated {
                expected: 4,
                available: buf.len(),
            });
        }
        let total = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if total > max_len {
            return Err(Error::OversizedLength {
                length: total,
                max: max_len,
            });
        }
        if buf.len() - 4 < total {
            return Err(Error::Truncated {
                expected: total,
                available: buf.len() - 4,
            });
        }
        let header = Self::decode_fields(&buf[4..4 + total])?;
        Ok((header, 4 + total))
    }

    /// Decode the field region of a header block (no total prefix).
    pub fn decode_fields(mut body: &[u8]) -> Result<Self> {
        let mut header = Self::new();
        while !body.is_empty() {
            if body.len() < 4 {
                return Err(Error::Truncated {
                    expected: 4,
                    available: body.len(),
                });
            }
            let field_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
            if field_len == 0 {
                return Err(Error::ZeroLengthField);
            }
            body = &body[4..];
            if body.len() < field_len {
                return Err(Error::Truncated {
                    expected: field_len,
                    available: body.len(),
                });
            }
            let field = &body[..field_len];
            body = &body[field_len..];
            let eq = field
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| Error::MalformedField(String::from_utf8_lossy(field).into_owned()))?;
            let key = String::from_utf8_lossy(&field[..eq]);
            let value = String::from_utf8_lossy(&field[eq + 1..]);
            header.insert(&key, &value);
        }
        Ok(header)
    }

    /// Read a full header block from `reader`.
    pub fn read_from<R: Read>(reader: &mut R, max_len: usize) -> Result<Self> {
        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix)?;
        let total = u32::from_le_bytes(prefix) as usize;
        if total > max_len {
            return Err(Error::OversizedLength {
                length: total,
                max: max_len,
            });
        }
        let mut body = vec![0u8; total];
        reader.read_exact(&mut body)?;
        Self::decode_fields(&body)
    }

    /// Write the encoded header block to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }
}

/// Field-set equality, ignoring wire order.
impl PartialEq for ConnectionHeader {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k) == Some(v.as_str()))
    }
}

impl Eq for ConnectionHeader {}

impl std::fmt::Display for ConnectionHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}
