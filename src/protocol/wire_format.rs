//! Wire format encoding and decoding.
//!
//! Every frame exchanged with the wattmeter has the same layout:
//! ```text
//! ┌────────┬──────────┬─────────────┬─────────┐
//! │ Header │ Length   │ Payload     │ CRC-8   │
//! │ 0xAA   │ uint16 BE│ Length bytes│ 1 byte  │
//! └────────┴──────────┴─────────────┴─────────┘
//! ```
//!
//! The trailer is `crc8(payload)`; see [`crc8`](super::crc8).

/// Fixed first byte of every frame.
pub const FRAME_HEADER: u8 = 0xAA;

/// Bytes preceding the payload (header byte + 2-byte length).
pub const PREFIX_SIZE: usize = 3;

/// Bytes following the payload (CRC-8 trailer).
pub const TRAILER_SIZE: usize = 1;

/// Smallest possible frame (empty payload).
pub const MIN_FRAME_SIZE: usize = PREFIX_SIZE + TRAILER_SIZE;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Decoded frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Declared payload length in bytes.
    pub payload_length: u16,
}

impl Prefix {
    /// Create a prefix for a payload of the given length.
    pub fn new(payload_length: u16) -> Self {
        Self { payload_length }
    }

    /// Encode to bytes (header byte, then length Big Endian).
    pub fn encode(&self) -> [u8; PREFIX_SIZE] {
        let len = self.payload_length.to_be_bytes();
        [FRAME_HEADER, len[0], len[1]]
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if the buffer is too short or does not start with
    /// [`FRAME_HEADER`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < PREFIX_SIZE || buf[0] != FRAME_HEADER {
            return None;
        }
        Some(Self {
            payload_length: u16::from_be_bytes([buf[1], buf[2]]),
        })
    }

    /// Total frame size this prefix announces (prefix + payload + trailer).
    #[inline]
    pub fn frame_size(&self) -> usize {
        PREFIX_SIZE + self.payload_length as usize + TRAILER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_big_endian_byte_order() {
        let bytes = Prefix::new(0x0102).encode();
        assert_eq!(bytes, [0xAA, 0x01, 0x02]);
    }

    #[test]
    fn test_prefix_decode() {
        let prefix = Prefix::decode(&[0xAA, 0x00, 0x1A, 0x08]).unwrap();
        assert_eq!(prefix.payload_length, 26);
        assert_eq!(prefix.frame_size(), 30);
    }

    #[test]
    fn test_decode_rejects_wrong_header() {
        assert!(Prefix::decode(&[0xAB, 0x00, 0x01]).is_none());
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Prefix::decode(&[0xAA, 0x00]).is_none());
    }

    #[test]
    fn test_min_frame_size() {
        assert_eq!(MIN_FRAME_SIZE, 4);
        assert_eq!(Prefix::new(0).frame_size(), MIN_FRAME_SIZE);
    }
}
