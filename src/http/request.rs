//! HTTP request adaptation.
//!
//! # Responsibilities
//! - Split the URL path into `service` / `method`
//! - Take the payload from the query (GET, DELETE) or the JSON body
//!   (POST, PUT, PATCH)
//! - Copy string request headers into the packet and stamp `rpc-id`
//!
//! # Design Decisions
//! - The last path segment is the method, the one before it the service;
//!   anything in front is ignored
//! - An empty body is `{}`

use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::rpc::{HeaderValue, OpCode, Packet, RPC_ID_HEADER};

/// Outcome of adapting one HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub enum Adapted {
    /// Dispatch this REQUEST packet.
    Packet(Packet),
    /// CORS preflight; answered with 200 and nothing dispatched.
    Preflight,
}

pub fn adapt(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    rpc_id: u64,
) -> Result<Adapted, TransportError> {
    let payload = match *method {
        Method::OPTIONS => return Ok(Adapted::Preflight),
        Method::GET | Method::DELETE => query_payload(uri.query()),
        Method::POST | Method::PUT | Method::PATCH => body_payload(body)?,
        _ => return Err(TransportError::MethodNotAllowed(method.to_string())),
    };

    let (service, rpc_method) = split_path(uri.path())?;

    let mut packet = Packet::new(OpCode::Request, payload);
    packet.service = service;
    packet.method = Some(rpc_method);
    packet.path = Some(uri.path().to_string());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            packet
                .headers
                .insert(name.as_str().to_string(), HeaderValue::from(value));
        }
    }
    packet.headers.insert(RPC_ID_HEADER.to_string(), HeaderValue::from(rpc_id));

    Ok(Adapted::Packet(packet))
}

/// `/a/b/svc/method` → `(Some("svc"), "method")`; `/method` → `(None, "method")`.
pub fn split_path(path: &str) -> Result<(Option<String>, String), TransportError> {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).rev();
    let method = segments
        .next()
        .ok_or_else(|| TransportError::RouteNotFound(path.to_string()))?;
    let service = segments.next().map(str::to_string);
    Ok((service, method.to_string()))
}

fn query_payload(query: Option<&str>) -> Value {
    let params: Map<String, Value> = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    Value::Object(params)
}

fn body_payload(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| TransportError::BodyParseFailed(e.to_string()))
}
