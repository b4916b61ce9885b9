//! Fuzz target for EncryptedTransport::read on an armed transport
//!
//! # Strategy
//!
//! - Raw records: arbitrary bytes of any length
//! - Mutated records: a genuine record with one byte flipped
//!
//! # Invariants
//!
//! - Reading NEVER panics
//! - With HMAC, no mutated record is accepted
//! - Unmodified records always round-trip

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use veilwire_core::{EncryptedTransport, SessionKeyMaterial, TransportConfig, TransportError};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Raw { legacy: bool, record: Vec<u8> },
    Mutated { plaintext: Vec<u8>, position: u16, flip: u8 },
}

fuzz_target!(|input: Input| {
    let material = SessionKeyMaterial::new([0x5a; 16], [0xa5; 16]);

    match input {
        Input::Raw { legacy, record } => {
            let config = if legacy { TransportConfig::legacy() } else { TransportConfig::default() };
            let mut transport = EncryptedTransport::with_rng((), config, ChaCha20Rng::seed_from_u64(0));
            transport.arm(material).expect("arm");
            let _ = transport.read(&record);
        },
        Input::Mutated { plaintext, position, flip } => {
            let mut transport = EncryptedTransport::with_rng(
                (),
                TransportConfig::default(),
                ChaCha20Rng::seed_from_u64(1),
            );
            transport.arm(material).expect("arm");

            let mut record = transport.seal(&plaintext).expect("seal");
            assert_eq!(transport.read(&record).expect("genuine record"), plaintext);

            if flip != 0 {
                let index = usize::from(position) % record.len();
                record[index] ^= flip;
                assert_eq!(transport.read(&record), Err(TransportError::AuthenticationFailure));
            }
        },
    }
});
