// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message frame codec.
//!
//! After the connection header exchange, every message travels as one frame:
//!
//! ```text
//! u32 payload length (little-endian)
//! payload bytes
//! ```
//!
//! Zero-length payloads are legal. Declared lengths above the configured
//! ceiling are rejected before any allocation, so a corrupt or hostile peer
//! cannot make the reader balloon.

use crate::config::MAX_FRAME_LEN;
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// Length-prefixed frame encoder/decoder.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    /// Append the framed form of `payload` to `out`.
    pub fn encode_into(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(Error::OversizedLength {
                length: payload.len(),
                max: self.max_frame_len,
            });
        }
        out.reserve(4 + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        Ok(())
    }

    /// Frame `payload` into a fresh buffer.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(4 + payload.len());
        self.encode_into(payload, &mut out)?;
        Ok(out)
    }

    /// Write one frame to `writer`.
    pub fn write_frame<W: Write>(&self, writer: &mut W, payload: &[u8]) -> Result<()> {
        writer.write_all(&self.encode(payload)?)?;
        Ok(())
    }

    /// Read one frame from `reader`, blocking until it arrives.
    ///
    /// Returns `None` when the stream ends cleanly on a frame boundary.
    /// EOF inside a frame is reported as [`Error::Truncated`].
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; 4];
        if !fill_or_eof(reader, &mut prefix)? {
            return Ok(None);
        }
        let length = u32::from_le_bytes(prefix) as usize;
        if length > self.max_frame_len {
            return Err(Error::OversizedLength {
                length,
                max: self.max_frame_len,
            });
        }
        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                Error::Truncated {
                    expected: length,
                    available: 0,
                }
            } else {
                Error::from(e)
            }
        })?;
        Ok(Some(payload))
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns the payload slice and the number of bytes consumed.
    pub fn decode<'a>(&self, buf: &'a [u8]) -> Result<(&'a [u8], usize)> {
        if buf.len() < 4 {
            return Err(Error::Truncated {
                expected: 4,
                available: buf.len(),
            });
        }
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length > self.max_frame_len {
            return Err(Error::OversizedLength {
                length,
                max: self.max_frame_len,
            });
        }
        if buf.len() - 4 < length {
            return Err(Error::Truncated {
                expected: length,
                available: buf.len() - 4,
            });
        }
        Ok((&buf[4..4 + length], 4 + length))
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

/// Fill `buf` from `reader`. `Ok(false)` means EOF before the first byte.
fn fill_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(Error::Truncated {
                    expected: buf.len(),
                    available: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_bytes() {
        let codec = FrameCodec::default();
        let framed = codec.encode(b"hi").unwrap();
        let mut expected = 2u32.to_le_bytes().to_vec();
        expected.extend_from_slice(b"hi");
        assert_eq!(framed, expected);
    }

    #[test]
    fn test_stream_round_trip() {
        let codec = FrameCodec::default();
        let mut wire = Vec::new();
        codec.write_frame(&mut wire, b"first").unwrap();
        codec.write_frame(&mut wire, b"").unwrap();
        codec.write_frame(&mut wire, b"third").unwrap();
        let mut cursor = Cursor::new(wire);
        assert_eq!(codec.read_frame(&mut cursor).unwrap().unwrap(), b"first");
        assert_eq!(codec.read_frame(&mut cursor).unwrap().unwrap(), b"");
        assert_eq!(codec.read_frame(&mut cursor).unwrap().unwrap(), b"third");
        assert!(codec.read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_eof_inside_frame_is_truncation() {
        let codec = FrameCodec::default();
        let mut wire = codec.encode(b"payload").unwrap();
        wire.truncate(wire.len() - 3);
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            codec.read_frame(&mut cursor),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_eof_inside_prefix_is_truncation() {
        let codec = FrameCodec::default();
        let mut cursor = Cursor::new(vec![1u8, 0]);
        assert!(matches!(
            codec.read_frame(&mut cursor),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let codec = FrameCodec::new(16);
        let mut cursor = Cursor::new(17u32.to_le_bytes().to_vec());
        assert!(matches!(
            codec.read_frame(&mut cursor),
            Err(Error::OversizedLength { length: 17, max: 16 })
        ));
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let codec = FrameCodec::new(4);
        assert!(codec.encode(b"12345").is_err());
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let codec = FrameCodec::default();
        let mut buf = codec.encode(b"one").unwrap();
        buf.extend_from_slice(&[9, 9, 9]);
        let (payload, consumed) = codec.decode(&buf).unwrap();
        assert_eq!(payload, b"one");
        assert_eq!(consumed, 7);
    }
}
