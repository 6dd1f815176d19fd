//! Protocol module - wire format, checksum, framing.
//!
//! This module implements the byte-level protocol spoken over the
//! wattmeter's UART-style GATT service:
//! - 3-byte prefix (header byte + Big Endian length) encoding/decoding
//! - CRC-8 trailer computation and verification
//! - Reassembly buffer for notifications that split frames arbitrarily

mod crc;
mod frame;
mod frame_buffer;
mod wire_format;

pub use self::crc::{crc8, CRC8_POLYNOMIAL, CRC_8_BTWATTCH2};
pub use frame::{build_frame, Frame};
pub use frame_buffer::{FeedResult, FrameBuffer, DEFAULT_MAX_PAYLOAD};
pub use wire_format::{
    Prefix, FRAME_HEADER, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE, PREFIX_SIZE, TRAILER_SIZE,
};
