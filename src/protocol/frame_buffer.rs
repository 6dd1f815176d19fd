//! Reassembly buffer for fragmented notifications.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! BLE notifications carry at most one MTU of data, so a single frame may
//! arrive split over several notifications. The buffer is a small state
//! machine:
//! - `WaitingForPrefix`: need the header byte plus the 2-byte length
//! - `WaitingForBody`: length known, need payload + trailer bytes
//!
//! Any inconsistency (wrong header byte, declared length above the payload
//! cap, checksum mismatch, more bytes than declared) discards everything
//! buffered and reports [`FeedResult::Desync`].
//! The next poll cycle implicitly retries, so nothing is propagated.
//!
//! # Example
//!
//! ```
//! use btwattch2::protocol::{build_frame, FeedResult, FrameBuffer};
//!
//! let bytes = build_frame(&[0xA7, 0x01]);
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(matches!(buffer.feed(&bytes[..2]), FeedResult::Incomplete));
//! assert!(matches!(buffer.feed(&bytes[2..]), FeedResult::Complete(_)));
//! ```

use bytes::BytesMut;

use super::crc::crc8;
use super::wire_format::{Prefix, FRAME_HEADER, PREFIX_SIZE};
use super::Frame;

/// Default buffer capacity; one energy-usage frame is 30 bytes.
const DEFAULT_CAPACITY: usize = 64;

/// Default cap on the declared payload length.
///
/// The largest known response carries 26 payload bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 64;

/// Outcome of feeding one fragment into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    /// More bytes are needed before a frame can be emitted.
    Incomplete,
    /// A whole frame arrived and its checksum verified.
    Complete(Frame),
    /// The buffered bytes cannot form a valid frame and were discarded.
    Desync,
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the header byte and length field.
    WaitingForPrefix,
    /// Prefix parsed, waiting until `frame_size` bytes are buffered.
    WaitingForBody { frame_size: usize },
}

/// Per-connection accumulator of in-flight frame bytes.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from notifications.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Number of desyncs since creation.
    desyncs: u64,
    /// Largest declared payload length accepted.
    max_payload: usize,
}

impl FrameBuffer {
    /// Create a new, empty frame buffer.
    ///
    /// Default max payload: [`DEFAULT_MAX_PAYLOAD`].
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new frame buffer with a custom max payload length.
    ///
    /// A prefix declaring more than `max_payload` bytes is a desync.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForPrefix,
            desyncs: 0,
            max_payload,
        }
    }

    /// Append a notification fragment and try to complete a frame.
    pub fn feed(&mut self, fragment: &[u8]) -> FeedResult {
        self.buffer.extend_from_slice(fragment);

        if self.buffer.is_empty() {
            return FeedResult::Incomplete;
        }

        if self.buffer[0] != FRAME_HEADER {
            tracing::debug!(
                "Frame does not start with header byte: {:#04x}",
                self.buffer[0]
            );
            return self.desync();
        }

        if let State::WaitingForPrefix = self.state {
            match Prefix::decode(&self.buffer) {
                Some(prefix) => {
                    if usize::from(prefix.payload_length) > self.max_payload {
                        tracing::debug!(
                            "Declared payload {} exceeds maximum {}",
                            prefix.payload_length,
                            self.max_payload
                        );
                        return self.desync();
                    }
                    self.state = State::WaitingForBody {
                        frame_size: prefix.frame_size(),
                    };
                }
                None => return FeedResult::Incomplete,
            }
        }

        let State::WaitingForBody { frame_size } = self.state else {
            return FeedResult::Incomplete;
        };

        if self.buffer.len() < frame_size {
            return FeedResult::Incomplete;
        }

        if self.buffer.len() > frame_size {
            tracing::debug!(
                "Buffered {} bytes but frame declares {}",
                self.buffer.len(),
                frame_size
            );
            return self.desync();
        }

        // Payload followed by its own CRC checks to zero.
        if crc8(&self.buffer[PREFIX_SIZE..]) != 0 {
            tracing::debug!("Checksum mismatch on {}-byte frame", frame_size);
            return self.desync();
        }

        let raw = self.buffer.split().freeze();
        self.state = State::WaitingForPrefix;
        FeedResult::Complete(Frame::from_validated(raw))
    }

    /// Discard buffered bytes and report a desync.
    fn desync(&mut self) -> FeedResult {
        self.clear();
        self.desyncs += 1;
        FeedResult::Desync
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of desyncs observed so far.
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
