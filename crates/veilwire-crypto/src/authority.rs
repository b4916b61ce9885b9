//! Handshake authority keys
//!
//! The initiator holds an [`AuthorityKeyPair`]. Responders know only the
//! [`AuthorityPublicKey`] and use it for two things:
//!
//! - verify the Ed25519 signature over the handshake transcript, so a
//!   man-in-the-middle cannot substitute its own DH parameters
//! - seal the responder's random seed so only the initiator can read it
//!
//! Both halves are carried in one 64-byte encoding:
//!
//! ```text
//! key pair:    ed25519_seed(32)  || x25519_secret(32)
//! public key:  ed25519_public(32) || x25519_public(32)
//! ```
//!
//! # Sealing
//!
//! ```text
//! eph = fresh X25519 secret
//! shared = X25519(eph, recipient)
//! key = HKDF-SHA256(ikm = shared, info = label || eph_pub || recipient)
//! sealed = eph_pub(32) || nonce(24) || XChaCha20-Poly1305(key, nonce, seed)
//! ```

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as SealingPublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Ed25519 signature size
pub const SIGNATURE_SIZE: usize = 64;

/// Encoded key size for both key pairs and public keys
pub const ENCODED_KEY_SIZE: usize = 64;

/// Bytes added by [`AuthorityPublicKey::seal`]
pub const SEAL_OVERHEAD: usize = SEAL_HEADER_SIZE + 16;

const HALF: usize = 32;
const NONCE_SIZE: usize = 24;
const SEAL_HEADER_SIZE: usize = HALF + NONCE_SIZE;
const SEAL_LABEL: &[u8] = b"veilwire seed seal v1";

/// Long-term key pair held by the handshake initiator.
pub struct AuthorityKeyPair {
    signing_key: SigningKey,
    sealing_secret: StaticSecret,
}

impl AuthorityKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(&mut *rng);
        let sealing_secret = StaticSecret::random_from_rng(&mut *rng);
        Self { signing_key, sealing_secret }
    }

    /// Decode from the 64-byte encoding.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyEncoding` if `bytes` is not 64 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (signing, sealing) = split_halves(bytes)?;
        let signing = Zeroizing::new(signing);
        let sealing = Zeroizing::new(sealing);

        let signing_key = SigningKey::from_bytes(&signing);
        let sealing_secret = StaticSecret::from(*sealing);

        Ok(Self { signing_key, sealing_secret })
    }

    /// Encode as 64 bytes. The buffer is wiped when dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; ENCODED_KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; ENCODED_KEY_SIZE]);
        out[..HALF].copy_from_slice(self.signing_key.as_bytes());
        out[HALF..].copy_from_slice(self.sealing_secret.as_bytes());
        out
    }

    /// Decode from lowercase or uppercase hex.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyEncoding` for bad hex or a wrong length
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(decode_hex(encoded)?);
        Self::from_bytes(&bytes)
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.to_bytes()[..]))
    }

    /// The matching public key.
    pub fn public_key(&self) -> AuthorityPublicKey {
        AuthorityPublicKey {
            verifying_key: self.signing_key.verifying_key(),
            sealing_key: SealingPublicKey::from(&self.sealing_secret),
        }
    }

    /// Sign `message` with Ed25519.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Open a payload produced by [`AuthorityPublicKey::seal`].
    ///
    /// # Errors
    ///
    /// - `OpenFailed` if the payload is truncated, was sealed to another key,
    ///   or was modified
    pub fn open_seed(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::OpenFailed {
                reason: format!("sealed payload too short: {} bytes", sealed.len()),
            });
        }

        let (header, ciphertext) = sealed.split_at(SEAL_HEADER_SIZE);
        let (ephemeral, nonce) = header.split_at(HALF);
        let mut ephemeral_bytes = [0u8; HALF];
        ephemeral_bytes.copy_from_slice(ephemeral);
        let ephemeral = SealingPublicKey::from(ephemeral_bytes);

        let shared = self.sealing_secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(CryptoError::OpenFailed {
                reason: "non-contributory ephemeral key".to_string(),
            });
        }

        let recipient = SealingPublicKey::from(&self.sealing_secret);
        let cipher = seal_cipher(shared.as_bytes(), &ephemeral, &recipient);

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::OpenFailed { reason: "AEAD tag mismatch".to_string() })
    }
}

impl fmt::Debug for AuthorityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityKeyPair")
            .field("public_key", &self.public_key())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Public half of an [`AuthorityKeyPair`], distributed to responders.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthorityPublicKey {
    verifying_key: VerifyingKey,
    sealing_key: SealingPublicKey,
}

impl AuthorityPublicKey {
    /// Decode from the 64-byte encoding.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyEncoding` for a wrong length or an invalid Ed25519 point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (verifying, sealing) = split_halves(bytes)?;
        let verifying_key = VerifyingKey::from_bytes(&verifying).map_err(|err| {
            CryptoError::InvalidKeyEncoding { reason: format!("ed25519 public key: {err}") }
        })?;
        Ok(Self { verifying_key, sealing_key: SealingPublicKey::from(sealing) })
    }

    /// Encode as 64 bytes.
    pub fn to_bytes(&self) -> [u8; ENCODED_KEY_SIZE] {
        let mut out = [0u8; ENCODED_KEY_SIZE];
        out[..HALF].copy_from_slice(self.verifying_key.as_bytes());
        out[HALF..].copy_from_slice(self.sealing_key.as_bytes());
        out
    }

    /// Decode from hex.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyEncoding` for bad hex, a wrong length or an invalid point
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&decode_hex(encoded)?)
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify an Ed25519 signature over `message`.
    ///
    /// Uses strict verification, which rejects small-order keys and
    /// non-canonical signatures.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid` for a wrong-length or non-verifying signature
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::SignatureInvalid)?;
        self.verifying_key
            .verify_strict(message, &signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }

    /// Seal `seed` so only the key pair owner can open it.
    pub fn seal<R: RngCore + CryptoRng>(&self, seed: &[u8], rng: &mut R) -> Vec<u8> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(&mut *rng);
        let ephemeral = SealingPublicKey::from(&ephemeral_secret);
        let shared = ephemeral_secret.diffie_hellman(&self.sealing_key);

        let cipher = seal_cipher(shared.as_bytes(), &ephemeral, &self.sealing_key);

        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), seed) else {
            unreachable!("XChaCha20-Poly1305 encryption only fails for oversized input");
        };

        let mut sealed = Vec::with_capacity(SEAL_HEADER_SIZE + ciphertext.len());
        sealed.extend_from_slice(ephemeral.as_bytes());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        sealed
    }
}

impl fmt::Debug for AuthorityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorityPublicKey({})", self.to_hex())
    }
}

fn seal_cipher(
    shared: &[u8; HALF],
    ephemeral: &SealingPublicKey,
    recipient: &SealingPublicKey,
) -> XChaCha20Poly1305 {
    let mut info = Vec::with_capacity(SEAL_LABEL.len() + 2 * HALF);
    info.extend_from_slice(SEAL_LABEL);
    info.extend_from_slice(ephemeral.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new([0u8; HALF]);
    let Ok(()) = hkdf.expand(&info, &mut key[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let Ok(cipher) = XChaCha20Poly1305::new_from_slice(&key[..]) else {
        unreachable!("XChaCha20-Poly1305 keys are 32 bytes");
    };
    cipher
}

fn split_halves(bytes: &[u8]) -> Result<([u8; HALF], [u8; HALF]), CryptoError> {
    if bytes.len() != ENCODED_KEY_SIZE {
        return Err(CryptoError::InvalidKeyEncoding {
            reason: format!("expected {ENCODED_KEY_SIZE} bytes, got {}", bytes.len()),
        });
    }
    let mut first = [0u8; HALF];
    let mut second = [0u8; HALF];
    first.copy_from_slice(&bytes[..HALF]);
    second.copy_from_slice(&bytes[HALF..]);
    Ok((first, second))
}

fn decode_hex(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(encoded.trim())
        .map_err(|err| CryptoError::InvalidKeyEncoding { reason: format!("hex: {err}") })
}
