//! Transport-neutral packet envelope.
//!
//! Wire form (JSON text frame or HTTP body):
//! ```text
//! { "opcode": "REQUEST" | "RESPONSE" | "NOTIFY",
//!   "headers": { "<name>": "<string>" | <number>, ... },
//!   "payload": <any>,
//!   "service"?: "...", "method"?: "...", "path"?: "..." }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::TransportError;

/// Correlates one response with one request on a shared channel.
pub const RPC_ID_HEADER: &str = "rpc-id";
/// Session cookie and header name.
pub const SESSION_HEADER: &str = "rpc-session";
/// Reserved header overriding the HTTP status of a response.
pub const STATUS_HEADER: &str = "rpc-status";
/// Connector-level command carried by NOTIFY packets.
pub const COMMAND_HEADER: &str = "rpc-command";
/// Value of [`COMMAND_HEADER`] asking the peer to go away.
pub const COMMAND_OFF: &str = "off";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpCode {
    Request,
    Response,
    Notify,
}

impl OpCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            OpCode::Request => "REQUEST",
            OpCode::Response => "RESPONSE",
            OpCode::Notify => "NOTIFY",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUEST" => Some(OpCode::Request),
            "RESPONSE" => Some(OpCode::Response),
            "NOTIFY" => Some(OpCode::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Number(Number),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Number(_) => None,
        }
    }

    /// Numeric view; numeric strings are accepted too.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HeaderValue::Number(n) => n.as_u64(),
            HeaderValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<u64> for HeaderValue {
    fn from(value: u64) -> Self {
        HeaderValue::Number(value.into())
    }
}

impl From<u16> for HeaderValue {
    fn from(value: u16) -> Self {
        HeaderValue::Number(value.into())
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub opcode: OpCode,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Packet {
    pub fn new(opcode: OpCode, payload: Value) -> Self {
        Self {
            opcode,
            headers: Headers::new(),
            payload,
            service: None,
            method: None,
            path: None,
        }
    }

    pub fn request(service: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        let service = service.into();
        let method = method.into();
        let mut packet = Self::new(OpCode::Request, payload);
        packet.path = Some(format!("/{}/{}", service, method));
        packet.service = Some(service);
        packet.method = Some(method);
        packet
    }

    pub fn notify(service: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        let mut packet = Self::request(service, method, payload);
        packet.opcode = OpCode::Notify;
        packet
    }

    /// Response to `request`, carrying over its correlation id.
    pub fn response_to(request: &Packet, payload: Value) -> Self {
        let mut packet = Self::new(OpCode::Response, payload);
        if let Some(id) = request.headers.get(RPC_ID_HEADER) {
            packet.headers.insert(RPC_ID_HEADER.to_string(), id.clone());
        }
        packet
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn correlation_id(&self) -> Option<u64> {
        self.header(RPC_ID_HEADER).and_then(HeaderValue::as_u64)
    }

    /// True for the NOTIFY a listener sends before shutting down.
    pub fn is_off_command(&self) -> bool {
        self.opcode == OpCode::Notify
            && self.header(COMMAND_HEADER).and_then(HeaderValue::as_str) == Some(COMMAND_OFF)
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::ProtocolMismatch(e.to_string()))
    }

    /// Parse and validate a text frame.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| TransportError::BodyParseFailed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate the shape of decoded JSON before trusting it as a packet.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        let Value::Object(mut map) = value else {
            return Err(mismatch("packet must be a JSON object"));
        };

        let opcode = match map.get("opcode") {
            Some(Value::String(s)) => {
                OpCode::parse(s).ok_or_else(|| mismatch(format!("unknown opcode {s:?}")))?
            }
            Some(_) => return Err(mismatch("opcode must be a string")),
            None => return Err(mismatch("missing opcode")),
        };

        let headers = match map.remove("headers") {
            None | Some(Value::Null) => Headers::new(),
            Some(Value::Object(raw)) => validate_headers(raw)?,
            Some(_) => return Err(mismatch("headers must be an object")),
        };

        let service = optional_string(&map, "service")?;
        let method = optional_string(&map, "method")?;
        let path = optional_string(&map, "path")?;

        if opcode == OpCode::Request && method.is_none() && path.is_none() {
            return Err(mismatch("request carries neither method nor path"));
        }

        Ok(Self {
            opcode,
            headers,
            payload: map.remove("payload").unwrap_or(Value::Null),
            service,
            method,
            path,
        })
    }
}

fn mismatch(reason: impl Into<String>) -> TransportError {
    TransportError::ProtocolMismatch(reason.into())
}

fn validate_headers(raw: Map<String, Value>) -> Result<Headers, TransportError> {
    raw.into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name, HeaderValue::Text(s))),
            Value::Number(n) => Ok((name, HeaderValue::Number(n))),
            _ => Err(mismatch(format!("header {name:?} must be a string or number"))),
        })
        .collect()
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, TransportError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(mismatch(format!("{key} must be a string"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_survives_the_wire() {
        let packet = Packet::request("svc", "method", json!({"x": 1})).with_header(RPC_ID_HEADER, 7u64);
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.correlation_id(), Some(7));
        assert_eq!(decoded.path.as_deref(), Some("/svc/method"));
    }

    #[test]
    fn empty_route_fields_are_kept() {
        let mut packet = Packet::notify("", "tick", Value::Null);
        packet.path = Some(String::new());
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.service.as_deref(), Some(""));
        assert_eq!(decoded.path.as_deref(), Some(""));
    }

    #[test]
    fn malformed_json_is_a_parse_failure() {
        let err = Packet::decode("not-json").unwrap_err();
        assert_eq!(err.code(), "BODY_PARSE_FAILED");
    }

    #[test]
    fn shape_violations_are_protocol_mismatches() {
        for text in [
            r#"[1, 2]"#,
            r#"{"payload": {}}"#,
            r#"{"opcode": "PING"}"#,
            r#"{"opcode": "NOTIFY", "headers": {"a": {"nested": true}}}"#,
            r#"{"opcode": "NOTIFY", "method": 3}"#,
            r#"{"opcode": "REQUEST", "payload": {}}"#,
        ] {
            let err = Packet::decode(text).unwrap_err();
            assert_eq!(err.code(), "PROTOCOL_MISMATCH", "{text}");
        }
    }

    #[test]
    fn missing_payload_and_headers_default() {
        let packet = Packet::decode(r#"{"opcode": "RESPONSE"}"#).unwrap();
        assert!(packet.headers.is_empty());
        assert!(packet.payload.is_null());
    }

    #[test]
    fn response_copies_correlation_id() {
        let request = Packet::request("a", "b", Value::Null).with_header(RPC_ID_HEADER, 42u64);
        let response = Packet::response_to(&request, json!({"error": null, "result": 1}));

        assert_eq!(response.opcode, OpCode::Response);
        assert_eq!(response.correlation_id(), Some(42));
        assert!(response.method.is_none());
    }

    #[test]
    fn numeric_string_correlation_id() {
        let packet = Packet::new(OpCode::Response, Value::Null).with_header(RPC_ID_HEADER, "12");
        assert_eq!(packet.correlation_id(), Some(12));
    }

    #[test]
    fn off_command_detection() {
        let off = Packet::new(OpCode::Notify, Value::Null).with_header(COMMAND_HEADER, COMMAND_OFF);
        assert!(off.is_off_command());
        assert!(!Packet::notify("a", "b", Value::Null).is_off_command());
    }
}
