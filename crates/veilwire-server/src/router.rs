//! Request routing after the handshake.

use std::net::SocketAddr;

use serde_json::{Map, Value};
use veilwire_proto::{MessageEnvelope, Status, payloads::PING};

/// Per-request context passed to a [`Router`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Peer socket address (the session cache key)
    pub peer_addr: SocketAddr,
    /// Session token carried by the request, if any
    pub session_token: Option<String>,
}

/// Maps decrypted requests to responses.
///
/// Called on the connection task; implementations must not block.
pub trait Router: Send + Sync + 'static {
    /// Produce the response for `request`.
    fn route(&self, context: &SessionContext, request: &MessageEnvelope) -> MessageEnvelope;
}

/// Answers `ping` and returns `404` for everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRouter;

impl Router for DefaultRouter {
    fn route(&self, _context: &SessionContext, request: &MessageEnvelope) -> MessageEnvelope {
        if request.endpoint == PING {
            let mut payload = Map::new();
            payload.insert("pong".to_string(), Value::Bool(true));
            return MessageEnvelope::response_to(request, Status::ok(), payload);
        }

        MessageEnvelope::response_to(request, Status::not_found(&request.endpoint), Map::new())
    }
}
