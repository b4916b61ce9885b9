//! Fuzz target for FrameDecoder boundary conditions
//!
//! # Strategy
//!
//! - Declared lengths: zero, small, at-max, just-over-max, u32::MAX
//! - Chunking: the same stream split at arbitrary points
//!
//! # Invariants
//!
//! - A declared length over MAX_FRAME_SIZE returns `FrameTooLarge`
//! - Frames decode identically however the stream is chunked
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use veilwire_proto::{FrameDecoder, MAX_FRAME_SIZE, ProtocolError};

#[derive(Debug, Clone, Arbitrary)]
enum DeclaredLength {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    Max,
    Random(u32),
}

impl DeclaredLength {
    fn value(&self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::Small(n) => u32::from(*n),
            Self::AtMax => MAX_FRAME_SIZE as u32,
            Self::JustOverMax => MAX_FRAME_SIZE as u32 + 1,
            Self::Max => u32::MAX,
            Self::Random(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    length: DeclaredLength,
    body: Vec<u8>,
    split_points: Vec<u16>,
}

fuzz_target!(|input: Input| {
    let declared = input.length.value();
    let mut stream = declared.to_be_bytes().to_vec();
    stream.extend_from_slice(&input.body);

    let whole = decode_all(&[&stream[..]]);

    let mut chunks = Vec::new();
    let mut rest = &stream[..];
    for point in input.split_points {
        if rest.is_empty() {
            break;
        }
        let at = usize::from(point) % (rest.len() + 1);
        let (head, tail) = rest.split_at(at);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);

    assert_eq!(decode_all(&chunks), whole, "chunking changed the result");

    if declared as usize > MAX_FRAME_SIZE {
        assert!(matches!(whole, Err(ProtocolError::FrameTooLarge { .. })));
    }
});

fn decode_all(chunks: &[&[u8]]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        decoder.extend(chunk);
        while let Some(frame) = decoder.next_frame()? {
            frames.push(frame.to_vec());
        }
    }
    Ok(frames)
}
