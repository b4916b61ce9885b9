//! Veilwire Cryptographic Primitives
//!
//! Cryptographic building blocks for the Veilwire channel. Pure functions
//! with deterministic outputs. Callers provide the random number generator so
//! tests can run against a seeded RNG.
//!
//! # Key Lifecycle
//!
//! A session key is born from a Diffie-Hellman exchange whose initiator is
//! authenticated by an Ed25519 signature. The responder contributes a random
//! seed, sealed to the initiator's X25519 key, that salts the key
//! derivation.
//!
//! ```text
//! DHE (p, g, g^e mod p)  +  signed transcript
//!        │
//!        ▼
//! Mutual Secret (peer^e mod p)  +  sealed seed (salt)
//!        │
//!        ▼
//! Iterated SHA-256 KDF → 16-byte session key
//!        │
//!        ▼
//! AES-128-CBC (length-trailer padding)  +  optional HMAC-SHA-256 tag
//! ```
//!
//! # Security
//!
//! Confidentiality:
//! - AES-128 is implemented from its FIPS-197 definition, with tables derived
//!   at compile time
//! - CBC with the IV carried in every message
//!
//! Integrity:
//! - CBC alone has no integrity. The unpad check in [`cbc::unpad`] is a
//!   heuristic that both misses tampering and rejects nothing it should
//! - [`mac`] provides the HMAC-SHA-256 tag the transport verifies before
//!   decrypting
//!
//! Authentication:
//! - [`authority`] signs the handshake transcript and seals the responder
//!   seed to the initiator

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aes;
pub mod authority;
pub mod cbc;
pub mod dhe;
mod error;
pub mod kdf;
pub mod mac;

pub use aes::{Aes128, BLOCK_SIZE, Block, KEY_SIZE, RoundKeySchedule, decrypt_block, encrypt_block};
pub use authority::{AuthorityKeyPair, AuthorityPublicKey, SIGNATURE_SIZE};
pub use dhe::{DheParty, MutualSecret, generate_prime, is_probable_prime, validate_public_value};
pub use error::CryptoError;
pub use kdf::derive_key;
