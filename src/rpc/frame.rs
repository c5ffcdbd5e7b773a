// src/rpc/frame.rs
//! Wire envelope for the node RPC exchange
//!
//! Requests travel as `{"req": [id, method, params, ts], "sig": [...]}` and
//! responses as `{"res": [id, method, result, ts], "sig": [...]}`. The body
//! tuple is shared between both directions; payload internals stay untyped
//! here and are given shape per method by the protocol module.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `(id, method, payload, timestamp)` tuple carried by every frame.
///
/// Serializes as a JSON array, matching the wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody(u64, String, Value, u64);

impl MessageBody {
    /// A body stamped with the current wall-clock time in milliseconds.
    pub fn new(id: u64, method: &str, payload: Value) -> Self {
        Self(
            id,
            method.to_string(),
            payload,
            Utc::now().timestamp_millis() as u64,
        )
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn method(&self) -> &str {
        &self.1
    }

    pub fn payload(&self) -> &Value {
        &self.2
    }

    pub fn into_payload(self) -> Value {
        self.2
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.3
    }

    /// Bytes covered by the detached signature: the serialized body tuple.
    pub fn to_signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// One frame on the wire: a request or response body plus a detached
/// signature array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<MessageBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<MessageBody>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sig: Vec<String>,
}

impl Envelope {
    /// An unsigned request frame.
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            req: Some(MessageBody::new(id, method, params)),
            ..Default::default()
        }
    }

    /// A response frame, used when standing in for the node.
    pub fn response(id: u64, method: &str, result: Value) -> Self {
        Self {
            res: Some(MessageBody::new(id, method, result)),
            ..Default::default()
        }
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.sig.push(signature);
        self
    }

    pub fn request_body(&self) -> Option<&MessageBody> {
        self.req.as_ref()
    }

    pub fn response_body(&self) -> Option<&MessageBody> {
        self.res.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let envelope = Envelope::request(7, "get_channels", json!({ "participant": "0xabc" }))
            .with_signature("0xff".to_string());
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(wire["req"][0], 7);
        assert_eq!(wire["req"][1], "get_channels");
        assert_eq!(wire["req"][2]["participant"], "0xabc");
        assert!(wire["req"][3].as_u64().is_some());
        assert_eq!(wire["sig"][0], "0xff");
        // no response half on a request frame
        assert!(wire.get("res").is_none());
    }

    #[test]
    fn test_response_roundtrip() {
        let text = r#"{"res":[3,"auth_verify",{"jwt_token":"abc"},1700000000000],"sig":["0x01"]}"#;
        let envelope: Envelope = serde_json::from_str(text).unwrap();

        let body = envelope.response_body().unwrap();
        assert_eq!(body.id(), 3);
        assert_eq!(body.method(), "auth_verify");
        assert_eq!(body.payload()["jwt_token"], "abc");
        assert_eq!(body.timestamp_ms(), 1_700_000_000_000);
        assert!(envelope.request_body().is_none());
    }

    #[test]
    fn test_signing_bytes_cover_the_body_tuple() {
        let body = MessageBody::new(1, "ping", json!([]));
        let bytes = body.to_signing_bytes().unwrap();
        let echoed: MessageBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(echoed, body);
    }

    #[test]
    fn test_frames_without_a_body_are_detectable() {
        let envelope: Envelope = serde_json::from_str(r#"{"sig":[]}"#).unwrap();
        assert!(envelope.request_body().is_none());
        assert!(envelope.response_body().is_none());

        assert!(serde_json::from_str::<Envelope>("{not json").is_err());
    }
}
