// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! One enum, grouped by concern. Wire-level framing problems are fatal to
//! the decode operation that hit them; handshake mismatches are fatal to
//! that connection attempt; transient I/O on a data-plane channel is
//! isolated by the owning component and never surfaces here as a global
//! failure.

use std::fmt;
use std::io;

/// Errors raised by the transport and registration layers.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Framing Errors (fatal to the current decode)
    // ========================================================================
    /// A header field was encoded with length zero.
    ZeroLengthField,
    /// A header field is missing the `key=value` separator.
    MalformedField(String),
    /// The buffer ended before the announced length was available.
    Truncated { expected: usize, available: usize },
    /// A length prefix exceeds the configured maximum.
    OversizedLength { length: usize, max: usize },

    // ========================================================================
    // Handshake Errors (fatal to the connection attempt)
    // ========================================================================
    /// Peer announced a different message type than the local definition.
    TypeMismatch { expected: String, received: String },
    /// Peer announced a different md5 checksum than the local definition.
    ChecksumMismatch { expected: String, received: String },
    /// A required handshake header field is absent.
    MissingHeaderField(&'static str),
    /// Peer rejected the handshake with an `error` header field.
    HandshakeRejected(String),
    /// No local publisher for the requested topic.
    UnknownTopic(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    IoError(io::Error),
    /// Outbound connect did not complete within the configured timeout.
    ConnectTimeout(String),
    /// The channel was closed before or during the operation.
    ChannelClosed,

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// Deserializer rejected an incoming payload.
    Deserialization(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation is not valid in the component's current state.
    InvalidState(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Framing
            Error::ZeroLengthField => write!(f, "Zero-length header field"),
            Error::MalformedField(text) => {
                write!(f, "Header field missing '=' separator: {:?}", text)
            }
            Error::Truncated {
                expected,
                available,
            } => write!(
                f,
                "Truncated buffer: expected {} bytes, {} available",
                expected, available
            ),
            Error::OversizedLength { length, max } => {
                write!(f, "Length prefix {} exceeds maximum {}", length, max)
            }
            // Handshake
            Error::TypeMismatch { expected, received } => {
                write!(f, "Message type mismatch: {} != {}", received, expected)
            }
            Error::ChecksumMismatch { expected, received } => {
                write!(f, "Message md5 mismatch: {} != {}", received, expected)
            }
            Error::MissingHeaderField(field) => {
                write!(f, "Missing required header field: {}", field)
            }
            Error::HandshakeRejected(reason) => {
                write!(f, "Handshake rejected by peer: {}", reason)
            }
            Error::UnknownTopic(topic) => write!(f, "No publisher for topic: {}", topic),
            // Transport
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConnectTimeout(addr) => write!(f, "Connect timeout: {}", addr),
            Error::ChannelClosed => write!(f, "Channel closed"),
            // Data
            Error::Deserialization(msg) => write!(f, "Deserialization failed: {}", msg),
            // Lifecycle
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_framing_errors() {
        let e = Error::ZeroLengthField;
        assert_eq!(e.to_string(), "Zero-length header field");

        let e = Error::Truncated {
            expected: 16,
            available: 4,
        };
        assert!(e.to_string().contains("expected 16"));
        assert!(e.to_string().contains("4 available"));
    }

    #[test]
    fn test_io_error_source() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let e = Error::from(io_err);
        assert!(std::error::Error::source(&e).is_some());
        assert!(e.to_string().contains("refused"));
    }

    #[test]
    fn test_mismatch_messages_name_both_sides() {
        let e = Error::ChecksumMismatch {
            expected: "abc".into(),
            received: "def".into(),
        };
        let text = e.to_string();
        assert!(text.contains("abc"));
        assert!(text.contains("def"));
    }
}
