//! Handshake payloads
//!
//! Initiator to responder on `handshake.init`, responder to initiator on
//! `handshake.reply`. Field names are camelCase on the wire.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// First handshake message, sent by the initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInit {
    /// Prime modulus `p`
    #[serde(with = "crate::codec::decimal")]
    pub modulus: BigUint,
    /// Generator `g`
    #[serde(with = "crate::codec::decimal")]
    pub generator: BigUint,
    /// Initiator public value `g^e mod p`
    #[serde(with = "crate::codec::decimal")]
    pub public_value: BigUint,
    /// Session IV chosen by the initiator
    #[serde(with = "crate::codec::base64_bytes")]
    pub iv: Vec<u8>,
    /// Signature over the handshake transcript
    #[serde(with = "crate::codec::base64_bytes")]
    pub signature: Vec<u8>,
}

/// Second handshake message, sent by the responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    /// Responder public value `g^e' mod p`
    #[serde(with = "crate::codec::decimal")]
    pub public_value: BigUint,
    /// KDF salt sealed to the initiator's authority key
    #[serde(with = "crate::codec::base64_bytes")]
    pub encrypted_seed: Vec<u8>,
}
