//! Validated frame and outgoing frame construction.
//!
//! A [`Frame`] is only produced by [`FrameBuffer`](super::FrameBuffer) after
//! the header byte, declared length and CRC trailer have all been checked.
//! It keeps the complete raw bytes (zero-copy via `bytes::Bytes`) because
//! response decoders address fields by offset from the start of the frame.
//!
//! # Example
//!
//! ```
//! use btwattch2::protocol::{build_frame, FeedResult, FrameBuffer};
//!
//! let bytes = build_frame(&[0x08]);
//! assert_eq!(bytes, [0xAA, 0x00, 0x01, 0x08, 0xB3]);
//!
//! let mut buffer = FrameBuffer::new();
//! match buffer.feed(&bytes) {
//!     FeedResult::Complete(frame) => assert_eq!(frame.payload(), &[0x08]),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use bytes::Bytes;

use super::crc::crc8;
use super::wire_format::{Prefix, PREFIX_SIZE, TRAILER_SIZE};

/// A complete, checksum-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Wrap already-validated raw frame bytes.
    pub(crate) fn from_validated(raw: Bytes) -> Self {
        debug_assert!(raw.len() >= PREFIX_SIZE + TRAILER_SIZE);
        Self { raw }
    }

    /// Full frame bytes, header through trailer.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.raw[PREFIX_SIZE..self.raw.len() - TRAILER_SIZE]
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.raw.len() - PREFIX_SIZE - TRAILER_SIZE
    }

    /// First payload byte, which identifies the response kind.
    #[inline]
    pub fn kind(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    /// The CRC-8 trailer.
    #[inline]
    pub fn checksum(&self) -> u8 {
        self.raw[self.raw.len() - 1]
    }
}

/// Build a complete frame as a single byte vector.
///
/// Prepends the header byte and Big Endian length, appends the payload and
/// its CRC-8.
///
/// # Panics
///
/// Panics if `payload` is longer than the 16-bit length field allows.
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let length = u16::try_from(payload.len()).expect("payload exceeds 16-bit length field");
    let mut buf = Vec::with_capacity(PREFIX_SIZE + payload.len() + TRAILER_SIZE);
    buf.extend_from_slice(&Prefix::new(length).encode());
    buf.extend_from_slice(payload);
    buf.push(crc8(payload));
    buf
}
