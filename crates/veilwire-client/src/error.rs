//! Client error types.

use thiserror::Error;
use veilwire_core::{HandshakeError, TransportError};
use veilwire_proto::{ProtocolError, Status};

/// Errors from [`crate::connect`] and [`crate::ConnectedClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake rejected or failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Record could not be sealed or opened
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope or frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation did not finish in time
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited on
        operation: &'static str,
    },

    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Server answered with a non-success status
    #[error("request rejected: {} {}", .0.code, .0.message)]
    Rejected(Status),

    /// Background task failed
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Returns true if the connection cannot be used after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_fatal(),
            Self::Rejected(_) => false,
            _ => true,
        }
    }

    /// Returns true if reconnecting may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout { .. } | Self::ConnectionClosed => true,
            Self::Handshake(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_is_not_fatal() {
        let err = ClientError::Rejected(Status::not_found("nowhere"));
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("request rejected: 404"));
    }

    #[test]
    fn handshake_attack_is_permanent() {
        let err = ClientError::from(HandshakeError::AuthenticationFailure { reason: "sig".into() });
        assert!(err.is_fatal());
        assert!(!err.is_transient());
        assert!(ClientError::Timeout { operation: "handshake" }.is_transient());
    }
}
