//! Protocol error types

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from decoding or encoding wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Bytes are not a well-formed envelope
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Parser diagnostic
        reason: String,
    },

    /// Envelope payload does not match its endpoint's schema
    #[error("invalid payload for {endpoint}: {reason}")]
    InvalidField {
        /// Endpoint whose schema was violated
        endpoint: String,
        /// Which field and why
        reason: String,
    },

    /// Frame length exceeds the maximum
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or actual size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Returns true if the peer sent something structurally invalid.
    ///
    /// Encode failures are local bugs, not peer misbehavior.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}
