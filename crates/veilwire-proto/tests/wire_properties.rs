//! Property-based tests for envelopes and framing
//!
//! 1. **Envelope round-trip**: any envelope survives JSON encoding
//! 2. **Chunking independence**: frames decode identically however the byte
//!    stream is split
//! 3. **Garbage tolerance**: arbitrary bytes never panic the decoders

use proptest::prelude::*;
use serde_json::{Map, Value};
use veilwire_proto::{FrameDecoder, Header, MessageEnvelope, Method, Payload, Status, encode_frame};

fn arbitrary_method() -> impl Strategy<Value = Method> {
    prop_oneof![Just(Method::Get), Just(Method::Post), Just(Method::Put), Just(Method::Delete)]
}

fn arbitrary_header() -> impl Strategy<Value = Header> {
    prop_oneof![
        prop::option::of("[a-zA-Z0-9]{1,32}").prop_map(Header::Identity),
        (100u16..600, ".{0,32}").prop_map(|(code, message)| Header::Status(Status { code, message })),
    ]
}

fn arbitrary_payload() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6).prop_map(|entries| {
        entries.into_iter().map(|(key, value)| (key, Value::from(value))).collect()
    })
}

fn arbitrary_envelope() -> impl Strategy<Value = MessageEnvelope> {
    (arbitrary_header(), arbitrary_method(), "[a-z.]{1,24}", arbitrary_payload()).prop_map(
        |(header, method, endpoint, payload)| MessageEnvelope::new(header, method, endpoint, payload),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_envelope_roundtrip(envelope in arbitrary_envelope()) {
        let bytes = envelope.to_bytes().unwrap();
        prop_assert!(std::str::from_utf8(&bytes).is_ok());

        // PROPERTY: decode(encode(e)) == e
        let decoded = MessageEnvelope::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn prop_frames_independent_of_chunking(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
        chunk_size in 1usize..40,
    ) {
        let mut stream = Vec::new();
        for body in &bodies {
            stream.extend_from_slice(&encode_frame(body).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            decoder.extend(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                decoded.push(frame.to_vec());
            }
        }

        // PROPERTY: splitting the stream never changes the frames
        prop_assert_eq!(decoded, bodies);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(envelope) = MessageEnvelope::from_bytes(&bytes) {
            let _ = Payload::from_envelope(&envelope);
        }

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        while let Ok(Some(_)) = decoder.next_frame() {}
    }
}
