//! Iterated SHA-256 key derivation
//!
//! ```text
//! derived = secret || salt?
//! repeat iterations:
//!     derived = derived XOR SHA-256(derived)      (truncated to shorter)
//! key = derived[..size]
//! ```
//!
//! The XOR truncates to the shorter operand, so a secret longer than 32 bytes
//! collapses to 32 bytes after the first iteration and a shorter one keeps its
//! own length. Both handshake parties must run this bit-for-bit identically;
//! any divergence yields different keys with no error on either side.

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Stretch `secret` into a `size`-byte key.
///
/// The salt, when present, is appended once before the first iteration.
///
/// # Errors
///
/// - `KeyDerivation` if truncation leaves fewer than `size` bytes. A short key
///   is never returned.
pub fn derive_key(
    secret: &[u8],
    size: usize,
    iterations: u32,
    salt: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    let mut derived = Vec::with_capacity(secret.len() + salt.map_or(0, <[u8]>::len));
    derived.extend_from_slice(secret);
    if let Some(salt) = salt {
        derived.extend_from_slice(salt);
    }

    for _ in 0..iterations {
        let digest = Sha256::digest(&derived);
        derived.truncate(digest.len());
        for (byte, mask) in derived.iter_mut().zip(digest.iter()) {
            *byte ^= mask;
        }
    }

    if derived.len() < size {
        let produced = derived.len();
        derived.zeroize();
        return Err(CryptoError::KeyDerivation { requested: size, produced });
    }

    let key = derived[..size].to_vec();
    derived.zeroize();
    Ok(key)
}
