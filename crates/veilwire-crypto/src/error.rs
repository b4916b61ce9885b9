//! Error types for cryptographic primitives

use thiserror::Error;

/// Errors from cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Block cipher input was not exactly one block
    #[error("invalid block size: expected {expected}, got {actual}")]
    InvalidBlockSize {
        /// Required block size
        expected: usize,
        /// Size that was supplied
        actual: usize,
    },

    /// Key material has the wrong length
    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Required key size
        expected: usize,
        /// Size that was supplied
        actual: usize,
    },

    /// Initialization vector has the wrong length
    #[error("invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize {
        /// Required IV size
        expected: usize,
        /// Size that was supplied
        actual: usize,
    },

    /// Ciphertext is empty or not a whole number of blocks
    #[error("invalid ciphertext length: {len}")]
    InvalidCiphertextLength {
        /// Length of the rejected ciphertext
        len: usize,
    },

    /// Length trailer could not be parsed or points past the data.
    ///
    /// This is a heuristic signal only. A wrong key or tampered ciphertext
    /// can still produce a parseable trailer.
    #[error("invalid padding: {reason}")]
    InvalidPadding {
        /// What was wrong with the trailer
        reason: String,
    },

    /// Plaintext length does not fit in the 16-digit length trailer
    #[error("plaintext too long for length trailer: {len} bytes")]
    PlaintextTooLong {
        /// Length of the rejected plaintext
        len: usize,
    },

    /// KDF produced fewer bytes than requested
    #[error("key derivation produced {produced} bytes, {requested} requested")]
    KeyDerivation {
        /// Bytes the caller asked for
        requested: usize,
        /// Bytes the derivation yielded
        produced: usize,
    },

    /// Diffie-Hellman parameter or value out of range
    #[error("invalid DHE parameter: {reason}")]
    InvalidParameter {
        /// Which parameter failed and why
        reason: String,
    },

    /// Signature did not verify
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Sealed payload could not be opened
    #[error("sealed payload rejected: {reason}")]
    OpenFailed {
        /// Why the payload was rejected
        reason: String,
    },

    /// Authentication tag did not match
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// Encoded key could not be decoded
    #[error("invalid key encoding: {reason}")]
    InvalidKeyEncoding {
        /// Why decoding failed
        reason: String,
    },

    /// Long-running operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

impl CryptoError {
    /// Returns true if the error indicates tampering or a forged peer.
    ///
    /// Length and encoding errors are caller mistakes, not evidence of an
    /// attack.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::SignatureInvalid | Self::OpenFailed { .. } | Self::TagMismatch)
    }
}
