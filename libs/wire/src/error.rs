//! Wire Codec Error Types

use thiserror::Error;

/// Errors raised while encoding, decoding, or framing messages
#[derive(Error, Debug)]
pub enum WireError {
    /// Message failed to serialize
    #[error("Encode error: {0}")]
    Encode(#[source] bincode::Error),

    /// Inbound bytes did not decode to a valid message
    #[error("Decode error: {0}")]
    Decode(#[source] bincode::Error),

    /// Frame exceeds the configured size cap
    #[error("Frame too large: {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Underlying stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;
