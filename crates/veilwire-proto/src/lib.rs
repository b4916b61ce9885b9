//! Veilwire wire types
//!
//! Everything that crosses the socket: the JSON [`MessageEnvelope`], the
//! typed [`Payload`] variants validated at the boundary, and the
//! length-prefixed framing that delimits messages on a byte stream.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────┐
//! │ length (u32) │ body (plaintext JSON, or sealed transport    │
//! │ big endian   │ record once the session is armed)            │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! This crate performs no cryptography. Bodies are opaque to the framing
//! layer and the envelope never sees ciphertext.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod payloads;

pub use envelope::{Header, MessageEnvelope, Method, Status};
pub use errors::{ProtocolError, Result};
pub use frame::{FrameDecoder, HANDSHAKE_MAX_FRAME_SIZE, MAX_FRAME_SIZE, encode_frame};
pub use payloads::{
    Payload,
    handshake::{HandshakeInit, HandshakeReply},
};
