//! HMAC-SHA-256 tags for transport ciphertext
//!
//! The MAC key is derived from the session key with HKDF so the same 16 bytes
//! are never used both as an AES key and as an HMAC key.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Tag size in bytes
pub const TAG_SIZE: usize = 32;

/// MAC key size in bytes
pub const MAC_KEY_SIZE: usize = 32;

const MAC_KEY_LABEL: &[u8] = b"veilwire transport mac v1";

type HmacSha256 = Hmac<Sha256>;

/// Derive the transport MAC key from a session key.
pub fn derive_mac_key(session_key: &[u8]) -> Zeroizing<[u8; MAC_KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, session_key);
    let mut mac_key = Zeroizing::new([0u8; MAC_KEY_SIZE]);
    let Ok(()) = hkdf.expand(MAC_KEY_LABEL, &mut mac_key[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    mac_key
}

/// Compute the tag over the concatenation of `parts`.
pub fn compute_tag(mac_key: &[u8], parts: &[&[u8]]) -> [u8; TAG_SIZE] {
    let mut mac = new_mac(mac_key);
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Verify `tag` over the concatenation of `parts` in constant time.
///
/// # Errors
///
/// - `TagMismatch` if the tag is wrong or has the wrong length
pub fn verify_tag(mac_key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = new_mac(mac_key);
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).map_err(|_| CryptoError::TagMismatch)
}

fn new_mac(mac_key: &[u8]) -> HmacSha256 {
    let Ok(mac) = HmacSha256::new_from_slice(mac_key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac
}
