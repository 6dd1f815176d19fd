//! Error types for btwattch2.

use thiserror::Error;

/// Main error type for all wattmeter operations.
#[derive(Debug, Error)]
pub enum WattchError {
    /// I/O error while writing an export file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The transport could not connect to the device.
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// Transport-level failure (GATT write, subscribe, read).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame too short for the fields it claims to carry.
    #[error("Frame truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    /// Calendar fields of an energy-usage frame do not form a valid date/time.
    #[error("Invalid timestamp in energy-usage frame")]
    InvalidTimestamp,

    /// The session task has terminated.
    #[error("Session closed")]
    SessionClosed,

    /// Polling driver was asked for a transition its current state forbids.
    #[error("Invalid poller transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::poller::PollState,
        to: crate::poller::PollState,
    },

    /// A background task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias using WattchError.
pub type Result<T> = std::result::Result<T, WattchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PollState;

    #[test]
    fn test_error_display() {
        let err = WattchError::ConnectionFailed {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to AA:BB:CC:DD:EE:FF: timeout"
        );

        let err = WattchError::Truncated { needed: 29, got: 10 };
        assert_eq!(err.to_string(), "Frame truncated: need 29 bytes, got 10");

        let err = WattchError::InvalidTransition {
            from: PollState::Idle,
            to: PollState::Polling,
        };
        assert_eq!(
            err.to_string(),
            "Invalid poller transition from Idle to Polling"
        );
    }
}
