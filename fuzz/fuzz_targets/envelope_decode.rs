//! Fuzz target for MessageEnvelope::from_bytes and Payload::from_envelope
//!
//! Arbitrary bytes go through the same decode path the server runs on every
//! decrypted record.
//!
//! # Invariants
//!
//! - Decoding NEVER panics; malformed input returns an error
//! - A decoded envelope re-encodes and decodes to itself

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilwire_proto::{MessageEnvelope, Payload};

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = MessageEnvelope::from_bytes(data) else {
        return;
    };

    let _ = Payload::from_envelope(&envelope);

    let encoded = envelope.to_bytes().expect("decoded envelope must re-encode");
    let decoded = MessageEnvelope::from_bytes(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(decoded, envelope);
});
