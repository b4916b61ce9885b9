//! Error types for the Veilwire core.
//!
//! Strongly-typed errors per layer: handshake errors (protocol violations,
//! authentication failures, state transitions), transport errors (integrity
//! and key installation) and session cache errors.
//!
//! Nothing here is retried automatically. A corrupted handshake or ciphertext
//! does not heal itself; the layer above decides whether to start over.

use std::net::SocketAddr;

use thiserror::Error;
use veilwire_crypto::CryptoError;

use crate::handshake::HandshakeState;

/// Errors from the handshake state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// A handshake field was missing, malformed or out of range.
    ///
    /// Treated as a possible attack: the connection must be closed.
    #[error("handshake protocol violation: {reason}")]
    ProtocolViolation {
        /// What was wrong
        reason: String,
    },

    /// Signature or sealed seed did not verify
    #[error("handshake authentication failed: {reason}")]
    AuthenticationFailure {
        /// Which check failed
        reason: String,
    },

    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State when the call was made
        state: HandshakeState,
        /// Operation that was attempted
        operation: String,
    },

    /// Caller cancelled the handshake (usually a timeout)
    #[error("handshake cancelled")]
    Cancelled,

    /// Local cryptographic failure not caused by the peer
    #[error("handshake crypto error: {0}")]
    Crypto(CryptoError),
}

impl HandshakeError {
    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation { reason: reason.into() }
    }

    pub(crate) fn authentication(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailure { reason: reason.into() }
    }

    /// Returns true if the peer may be hostile.
    ///
    /// Protocol violations and authentication failures are never caused by
    /// a well-behaved peer on a clean network.
    pub fn is_attack_indicator(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::AuthenticationFailure { .. })
    }

    /// Returns true if a fresh handshake may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors from [`crate::EncryptedTransport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// MAC tag did not verify. The record was forged or corrupted.
    #[error("transport authentication failed")]
    AuthenticationFailure,

    /// Decrypted record failed the padding check.
    ///
    /// Non-authoritative: without a MAC, a corrupted record can pass this
    /// check and a correct one is never rejected by it. Only a signal, never
    /// proof of tampering.
    #[error("decrypted record failed integrity heuristic: {reason}")]
    DecryptionIntegrityFailure {
        /// Unpad diagnostic
        reason: String,
    },

    /// Key or IV has the wrong size
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// Which field was wrong
        reason: String,
    },

    /// Transport already armed with different material
    #[error("transport already armed with different key material")]
    AlreadyArmed,

    /// Record too short or not block-aligned
    #[error("malformed ciphertext record: {len} bytes")]
    MalformedCiphertext {
        /// Record length
        len: usize,
    },

    /// Plaintext could not be encrypted
    #[error("encryption failed: {0}")]
    Crypto(CryptoError),

    /// Underlying transport is closed
    #[error("transport closed")]
    Closed,

    /// Underlying transport cannot queue another record. The peer is not
    /// draining what was already sent.
    #[error("outbound queue full ({capacity} records)")]
    Backpressure {
        /// Queue capacity in records
        capacity: usize,
    },
}

impl TransportError {
    /// Returns true if the connection cannot continue after this error.
    ///
    /// Integrity failures mean the byte stream can no longer be trusted.
    /// Arming errors are caller mistakes and leave the transport usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure
                | Self::DecryptionIntegrityFailure { .. }
                | Self::MalformedCiphertext { .. }
                | Self::Closed
                | Self::Backpressure { .. }
        )
    }
}

/// Errors from [`crate::SessionCache`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionCacheError {
    /// No entry for this peer
    #[error("no session for {addr}")]
    UnknownPeer {
        /// Peer address
        addr: SocketAddr,
    },

    /// Entry exists but no key material is installed
    #[error("session for {addr} has no key material")]
    NotEstablished {
        /// Peer address
        addr: SocketAddr,
    },
}
