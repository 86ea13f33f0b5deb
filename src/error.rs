//! Error types for the rflink-gateway library.

use thiserror::Error;

/// The main error type for link and device operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Protocol error from the transceiver.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The transceiver rejected the command with `CMD UNKNOWN`.
    #[error("command unknown: {command}")]
    CommandUnknown { command: String },

    /// Command timed out waiting for an acknowledgement.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The link is not active, commands cannot be queued.
    #[error("link unavailable")]
    Unavailable,

    /// The link is stopping and the command was discarded.
    #[error("link stopping")]
    Stopping,

    /// The link is restarting after a failure and the command was discarded.
    #[error("link restarting")]
    Restarting,

    /// A device with the same dispatch key is already registered.
    #[error("duplicate device id: {device_id}")]
    DuplicateDevice { device_id: String },

    /// The engine task is gone.
    #[error("channel closed")]
    ChannelClosed,
}

/// Line-specific errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Line has fewer than the three mandatory fields.
    #[error("too few fields: need at least 3, got {0}")]
    TooFewFields(usize),

    /// Line exceeds the maximum length without a delimiter.
    #[error("line too long: {size} bytes exceeds maximum {max}")]
    TooLong { size: usize, max: usize },
}

/// Result type alias for rflink-gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
