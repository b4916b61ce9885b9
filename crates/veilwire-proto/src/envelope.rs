//! JSON message envelope
//!
//! Every message on the channel, before and after the session is armed, is
//! one UTF-8 JSON object:
//!
//! ```json
//! { "identity": "session-token", "method": "GET", "endpoint": "ping", "payload": {} }
//! { "status": { "code": 200, "message": "OK" }, "method": "GET", "endpoint": "ping", "payload": {} }
//! ```
//!
//! Requests carry `identity` (a session token, or `null` before login).
//! Responses carry `status` instead. An object with both a non-null
//! `identity` and a `status` is rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ProtocolError, Result};

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read
    Get,
    /// Create or submit
    Post,
    /// Replace
    Put,
    /// Remove
    Delete,
}

/// Response status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// HTTP-style status code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl Status {
    /// Request succeeded.
    pub const OK: u16 = 200;
    /// Request was malformed.
    pub const BAD_REQUEST: u16 = 400;
    /// Caller is not authenticated.
    pub const UNAUTHORIZED: u16 = 401;
    /// No handler for the endpoint.
    pub const NOT_FOUND: u16 = 404;
    /// Handler failed.
    pub const INTERNAL_ERROR: u16 = 500;

    /// Success status.
    pub fn ok() -> Self {
        Self { code: Self::OK, message: "OK".to_string() }
    }

    /// Malformed request.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self { code: Self::BAD_REQUEST, message: reason.into() }
    }

    /// Missing or invalid session token.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHORIZED, message: reason.into() }
    }

    /// Unknown endpoint.
    pub fn not_found(endpoint: &str) -> Self {
        Self { code: Self::NOT_FOUND, message: format!("no handler for {endpoint}") }
    }

    /// Handler failure.
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self { code: Self::INTERNAL_ERROR, message: reason.into() }
    }

    /// Returns true for 2xx codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Identity of a request or status of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// Request from a client, with its session token if logged in
    Identity(Option<String>),
    /// Response from the server
    Status(Status),
}

/// One application-level message.
///
/// # Invariants
///
/// - `payload` is always a JSON object (possibly empty), never an array or
///   scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub struct MessageEnvelope {
    /// Identity or status
    pub header: Header,
    /// Request method
    pub method: Method,
    /// Endpoint name, e.g. `"ping"`
    pub endpoint: String,
    /// Endpoint-specific fields
    pub payload: Map<String, Value>,
}

impl MessageEnvelope {
    /// Create an envelope.
    pub fn new(
        header: Header,
        method: Method,
        endpoint: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self { header, method, endpoint: endpoint.into(), payload }
    }

    /// Create a request with an optional session token.
    pub fn request(
        identity: Option<String>,
        method: Method,
        endpoint: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self::new(Header::Identity(identity), method, endpoint, payload)
    }

    /// Create a response echoing the request's method and endpoint.
    pub fn response_to(request: &Self, status: Status, payload: Map<String, Value>) -> Self {
        Self::new(Header::Status(status), request.method, request.endpoint.clone(), payload)
    }

    /// Session token, if this is a request that carries one.
    pub fn identity(&self) -> Option<&str> {
        match &self.header {
            Header::Identity(identity) => identity.as_deref(),
            Header::Status(_) => None,
        }
    }

    /// Status, if this is a response.
    pub fn status(&self) -> Option<&Status> {
        match &self.header {
            Header::Identity(_) => None,
            Header::Status(status) => Some(status),
        }
    }

    /// Serialize to UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedMessage` for invalid UTF-8, invalid JSON,
    ///   missing keys, a non-object payload, or conflicting headers
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedMessage { reason: e.to_string() })
    }
}

/// Flat JSON shape of [`MessageEnvelope`]
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
    #[serde(default)]
    identity: Option<String>,
    method: Method,
    endpoint: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

impl TryFrom<RawEnvelope> for MessageEnvelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> std::result::Result<Self, Self::Error> {
        let header = match (raw.status, raw.identity) {
            (Some(_), Some(_)) => {
                return Err("envelope has both identity and status".to_string());
            },
            (Some(status), None) => Header::Status(status),
            (None, identity) => Header::Identity(identity),
        };
        Ok(Self { header, method: raw.method, endpoint: raw.endpoint, payload: raw.payload })
    }
}

impl From<MessageEnvelope> for RawEnvelope {
    fn from(envelope: MessageEnvelope) -> Self {
        let (status, identity) = match envelope.header {
            Header::Identity(identity) => (None, identity),
            Header::Status(status) => (Some(status), None),
        };
        Self {
            status,
            identity,
            method: envelope.method,
            endpoint: envelope.endpoint,
            payload: envelope.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn request_json_shape() {
        let envelope = MessageEnvelope::request(
            Some("tok".to_string()),
            Method::Post,
            "files.upload",
            object(json!({ "name": "a.txt" })),
        );
        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "identity": "tok",
                "method": "POST",
                "endpoint": "files.upload",
                "payload": { "name": "a.txt" },
            })
        );
    }

    #[test]
    fn anonymous_request_serializes_null_identity() {
        let envelope = MessageEnvelope::request(None, Method::Get, "ping", Map::new());
        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["identity"], Value::Null);
        assert!(value.get("status").is_none());
    }

    #[test]
    fn response_json_shape() {
        let request = MessageEnvelope::request(None, Method::Get, "ping", Map::new());
        let response = MessageEnvelope::response_to(&request, Status::not_found("ping"), Map::new());
        let value: Value = serde_json::from_slice(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(value["status"]["code"], json!(404));
        assert_eq!(value["method"], json!("GET"));
        assert!(value.get("identity").is_none());
    }

    #[test]
    fn roundtrip_preserves_header() {
        let request = MessageEnvelope::request(Some("t".to_string()), Method::Delete, "x", Map::new());
        let response = MessageEnvelope::response_to(&request, Status::ok(), Map::new());
        for envelope in [request, response] {
            let decoded = MessageEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn missing_payload_defaults_to_empty() {
        let envelope =
            MessageEnvelope::from_bytes(br#"{"identity":null,"method":"GET","endpoint":"ping"}"#)
                .unwrap();
        assert!(envelope.payload.is_empty());
        assert_eq!(envelope.identity(), None);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let cases: [&[u8]; 7] = [
            b"",
            b"not json",
            b"[1,2,3]",
            br#"{"identity":null,"method":"FETCH","endpoint":"x"}"#,
            br#"{"identity":null,"method":"GET"}"#,
            br#"{"identity":null,"method":"GET","endpoint":"x","payload":[1]}"#,
            br#"{"identity":"t","status":{"code":200,"message":"OK"},"method":"GET","endpoint":"x"}"#,
        ];
        for case in cases {
            assert!(
                matches!(
                    MessageEnvelope::from_bytes(case),
                    Err(ProtocolError::MalformedMessage { .. })
                ),
                "{} must be rejected",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn status_helpers() {
        assert!(Status::ok().is_success());
        assert!(!Status::bad_request("x").is_success());
        assert_eq!(Status::unauthorized("x").code, 401);
        assert_eq!(Status::internal_error("x").code, 500);
    }
}
