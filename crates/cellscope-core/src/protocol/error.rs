//! Protocol errors

use thiserror::Error;

/// Structural frame decode/encode failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("start marker not found")]
    BadStart,

    #[error("end marker missing or misplaced")]
    BadEnd,

    #[error("declared payload length {declared} exceeds available bytes {available}")]
    LengthMismatch { declared: usize, available: usize },

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),
}

/// Errors that can occur during device communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("serial port error: {0}")]
    Transport(String),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("device reported error status {0:#04x}")]
    Device(u8),

    #[error("response timeout")]
    Timeout,

    #[error("EEPROM gate sequence violation: {0}")]
    SequenceError(&'static str),

    #[error("not connected to device")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("disconnected while command was in flight")]
    Disconnected,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for failures that a per-command retry may recover from.
    /// Transport-level failures are not retried; they either mean the
    /// device is unreachable (connect) or fault the session (mid-command).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Framing(_) | ProtocolError::Device(_) | ProtocolError::Timeout
        )
    }
}
