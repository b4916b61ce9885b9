//! Veilwire Core
//!
//! Sans-IO handshake state machines and the encrypted transport for the
//! Veilwire channel. Nothing here touches a socket or a clock. Drivers in
//! `veilwire-server` and `veilwire-client` feed decoded payloads in and send
//! what comes out.
//!
//! # Components
//!
//! - [`Initiator`] / [`Responder`]: authenticated DH handshake
//! - [`EncryptedTransport`]: AES-128-CBC records once key material is armed
//! - [`SessionCache`]: per-peer parameters and key material
//! - [`CancelToken`]: cooperative cancellation for prime generation
//!
//! # Flow
//!
//! ```text
//! Initiator::start ──> handshake.init ──> Responder::handle_init
//!                                              │
//! Initiator::handle_reply <── handshake.reply ─┘
//!        │                                     │
//!        ▼                                     ▼
//! HandshakeCompletion                  HandshakeCompletion
//!        │                                     │
//!        ▼                                     ▼
//! EncryptedTransport::arm              EncryptedTransport::arm
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cancel;
pub mod error;
pub mod handshake;
pub mod session_cache;
pub mod transport;

pub use cancel::CancelToken;
pub use error::{HandshakeError, SessionCacheError, TransportError};
pub use handshake::{
    HandshakeCompletion, HandshakeConfig, HandshakeState, Initiator, Responder, decode_init,
    decode_reply, init_envelope, reply_envelope,
};
pub use session_cache::{SessionCache, SessionCacheEntry};
pub use transport::{
    DuplexTransport, EncryptedTransport, Integrity, IvPolicy, SessionKeyMaterial, TransportConfig,
};
