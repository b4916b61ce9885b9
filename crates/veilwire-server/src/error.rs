//! Server error types.

use std::fmt;

use veilwire_core::{HandshakeError, TransportError};
use veilwire_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable key file, etc.).
    ///
    /// Fatal: prevents server startup. Fix configuration and restart.
    Config(String),

    /// Socket error (bind failure, reset connection, etc.).
    ///
    /// May be transient (network issues) or fatal (bind address in use).
    Io(String),

    /// Peer sent bytes that are not a valid frame or envelope.
    ///
    /// Fatal for that connection; the server keeps serving others.
    Protocol(String),

    /// Handshake rejected or failed.
    ///
    /// Check [`HandshakeError::is_attack_indicator`] before deciding how
    /// loudly to report it.
    Handshake(HandshakeError),

    /// Peer did not complete the handshake within the configured limit.
    HandshakeTimeout,

    /// Record failed authentication or decryption after the handshake.
    ///
    /// Fatal for that connection: the stream can no longer be trusted.
    Record(TransportError),

    /// Unexpected state (task panic, closed channel).
    ///
    /// Should never happen in a correct implementation.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Io(msg) => write!(f, "i/o error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Handshake(err) => write!(f, "handshake error: {err}"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::Record(err) => write!(f, "record error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(err) => Some(err),
            Self::Record(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<HandshakeError> for ServerError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        Self::Record(err)
    }
}
