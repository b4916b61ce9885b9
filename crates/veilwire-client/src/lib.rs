//! Veilwire Client
//!
//! Tokio TCP client for the Veilwire channel. The client is the handshake
//! responder: the server sends signed DH parameters first, the client checks
//! them against the server's public key and the address it dialed, and both
//! sides arm an [`veilwire_core::EncryptedTransport`].
//!
//! ```text
//! connect ──> read handshake.init ──> Responder::handle_init (blocking pool)
//!         <── write handshake.reply
//!         ──> armed: request / response records
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connection;
mod error;

pub use connection::{
    ClientConfig, ConnectedClient, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    SessionSummary, connect,
};
pub use error::ClientError;
