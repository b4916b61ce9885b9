//! Fuzz target for the responder's validation of handshake.init
//!
//! The responder sees attacker-controlled parameters before anything is
//! authenticated, so every field check must hold up against arbitrary input.
//!
//! # Strategy
//!
//! - Raw bytes through `decode_init`
//! - Structured payloads with arbitrary modulus, generator, public value,
//!   IV and signature
//!
//! # Invariants
//!
//! - NEVER panic
//! - No unsigned payload is ever accepted: every result is an error
//! - A failed responder ends in `Failed`

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use num_bigint::BigUint;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use veilwire_core::{HandshakeConfig, HandshakeState, Responder, decode_init};
use veilwire_crypto::AuthorityKeyPair;
use veilwire_proto::HandshakeInit;

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Fields { modulus: Vec<u8>, generator: Vec<u8>, public_value: Vec<u8>, iv: Vec<u8>, signature: Vec<u8> },
}

fuzz_target!(|input: Input| {
    let mut rng = ChaCha20Rng::seed_from_u64(0);
    let authority = AuthorityKeyPair::generate(&mut rng);
    let config = HandshakeConfig { min_prime_bits: 16, max_prime_bits: 512, ..HandshakeConfig::default() };

    let init = match input {
        Input::Raw(bytes) => match decode_init(&bytes) {
            Ok(init) => init,
            Err(_) => return,
        },
        Input::Fields { modulus, generator, public_value, iv, signature } => HandshakeInit {
            modulus: BigUint::from_bytes_be(&modulus),
            generator: BigUint::from_bytes_be(&generator),
            public_value: BigUint::from_bytes_be(&public_value),
            iv,
            signature,
        },
    };

    let mut responder = Responder::new("127.0.0.1:7100", authority.public_key(), config);
    assert!(responder.handle_init(&init, &mut rng).is_err());
    assert_eq!(responder.state(), HandshakeState::Failed);
});
