//! Typed envelope payloads.
//!
//! The envelope's `payload` is a free-form JSON object. [`Payload`] gives it
//! a type per endpoint so handshake fields are validated once, at the
//! boundary, before any cryptographic code sees them.
//!
//! # Invariants
//!
//! Each known endpoint maps to exactly one variant. Unknown endpoints are not
//! an error here; they become [`Payload::Custom`] and the router decides.

pub mod handshake;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{
    envelope::{Header, MessageEnvelope, Method},
    errors::{ProtocolError, Result},
};

/// Endpoint of the initiator's first handshake message
pub const HANDSHAKE_INIT: &str = "handshake.init";

/// Endpoint of the responder's handshake reply
pub const HANDSHAKE_REPLY: &str = "handshake.reply";

/// Liveness check endpoint
pub const PING: &str = "ping";

/// Envelope payload, typed by endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `handshake.init`
    HandshakeInit(handshake::HandshakeInit),
    /// `handshake.reply`
    HandshakeReply(handshake::HandshakeReply),
    /// `ping`, payload ignored
    Ping,
    /// Any other endpoint, payload passed through untouched
    Custom {
        /// Endpoint name
        endpoint: String,
        /// Raw payload object
        body: Map<String, Value>,
    },
}

impl Payload {
    /// Endpoint name for this payload.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::HandshakeInit(_) => HANDSHAKE_INIT,
            Self::HandshakeReply(_) => HANDSHAKE_REPLY,
            Self::Ping => PING,
            Self::Custom { endpoint, .. } => endpoint,
        }
    }

    /// Validate an envelope's payload against its endpoint's schema.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidField` if a known endpoint's payload is
    ///   missing a field or a field has the wrong type or encoding
    pub fn from_envelope(envelope: &MessageEnvelope) -> Result<Self> {
        match envelope.endpoint.as_str() {
            HANDSHAKE_INIT => decode(HANDSHAKE_INIT, &envelope.payload).map(Self::HandshakeInit),
            HANDSHAKE_REPLY => decode(HANDSHAKE_REPLY, &envelope.payload).map(Self::HandshakeReply),
            PING => Ok(Self::Ping),
            other => {
                Ok(Self::Custom { endpoint: other.to_string(), body: envelope.payload.clone() })
            },
        }
    }

    /// Wrap this payload in an envelope.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if a payload struct fails to serialize
    pub fn into_envelope(self, header: Header, method: Method) -> Result<MessageEnvelope> {
        let endpoint = self.endpoint().to_string();
        let payload = match self {
            Self::HandshakeInit(inner) => encode(&inner)?,
            Self::HandshakeReply(inner) => encode(&inner)?,
            Self::Ping => Map::new(),
            Self::Custom { body, .. } => body,
        };
        Ok(MessageEnvelope::new(header, method, endpoint, payload))
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, payload: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(payload.clone())).map_err(|e| {
        ProtocolError::InvalidField { endpoint: endpoint.to_string(), reason: e.to_string() }
    })
}

fn encode<T: Serialize>(inner: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(inner) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProtocolError::Encode("payload is not a JSON object".to_string())),
        Err(e) => Err(ProtocolError::Encode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;
    use serde_json::json;

    use super::{
        handshake::{HandshakeInit, HandshakeReply},
        *,
    };

    fn init() -> HandshakeInit {
        HandshakeInit {
            modulus: BigUint::from(23u32),
            generator: BigUint::from(5u32),
            public_value: BigUint::from(8u32),
            iv: vec![7; 16],
            signature: vec![1; 64],
        }
    }

    #[test]
    fn handshake_init_wire_fields() {
        let envelope =
            Payload::HandshakeInit(init()).into_envelope(Header::Identity(None), Method::Post).unwrap();
        assert_eq!(envelope.endpoint, HANDSHAKE_INIT);

        let keys: Vec<&str> = envelope.payload.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 5);
        for key in ["modulus", "generator", "publicValue", "iv", "signature"] {
            assert!(envelope.payload.contains_key(key), "missing {key}");
        }
        assert_eq!(envelope.payload["modulus"], json!("23"));
    }

    #[test]
    fn handshake_init_roundtrip_through_bytes() {
        let envelope =
            Payload::HandshakeInit(init()).into_envelope(Header::Identity(None), Method::Post).unwrap();
        let decoded = MessageEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(Payload::from_envelope(&decoded).unwrap(), Payload::HandshakeInit(init()));
    }

    #[test]
    fn handshake_reply_wire_fields() {
        let reply = HandshakeReply { public_value: BigUint::from(19u32), encrypted_seed: vec![0xAB; 4] };
        let envelope =
            Payload::HandshakeReply(reply).into_envelope(Header::Identity(None), Method::Post).unwrap();
        assert_eq!(envelope.payload["publicValue"], json!("19"));
        assert_eq!(envelope.payload["encryptedSeed"], json!("q6urqw=="));
    }

    #[test]
    fn missing_field_is_invalid() {
        let mut envelope =
            Payload::HandshakeInit(init()).into_envelope(Header::Identity(None), Method::Post).unwrap();
        envelope.payload.remove("signature");
        assert!(matches!(
            Payload::from_envelope(&envelope),
            Err(ProtocolError::InvalidField { endpoint, .. }) if endpoint == HANDSHAKE_INIT
        ));
    }

    #[test]
    fn wrong_type_is_invalid() {
        let mut envelope =
            Payload::HandshakeInit(init()).into_envelope(Header::Identity(None), Method::Post).unwrap();
        envelope.payload.insert("iv".to_string(), json!(12));
        assert!(Payload::from_envelope(&envelope).is_err());
    }

    #[test]
    fn unknown_endpoint_is_custom() {
        let body = match json!({ "q": 1 }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let envelope = MessageEnvelope::request(None, Method::Get, "search", body.clone());
        assert_eq!(
            Payload::from_envelope(&envelope).unwrap(),
            Payload::Custom { endpoint: "search".to_string(), body }
        );
    }

    #[test]
    fn ping_ignores_payload() {
        let envelope = MessageEnvelope::request(None, Method::Get, PING, Map::new());
        assert_eq!(Payload::from_envelope(&envelope).unwrap(), Payload::Ping);
    }
}
