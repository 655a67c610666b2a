//! HTTP connectors.
//!
//! # Responsibilities
//! - `HttpConnector`: wrap one inbound request/response cycle so handlers
//!   reply through the same `Connector` contract as on WebSocket
//! - `HttpClientConnector`: issue REQUEST/NOTIFY packets as one-shot POSTs
//!   and hand the answer back to the handler as a RESPONSE packet
//!
//! # Design Decisions
//! - The inbound connector keeps the first response written; later sends
//!   fail with `TunnelNotAvailable` once the cycle is finished
//! - `rpc-status` sets the HTTP status and is never copied as a header

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{endpoint_of, lock, Connector, ConnectorState, Protocol, StateCell, StateChange, Target};
use crate::error::TransportError;
use crate::http::request::{self, Adapted};
use crate::net::connection::ConnectorId;
use crate::observability::metrics;
use crate::rpc::{dispatch, HeaderValue, IncomingHandler, OpCode, Packet, RPC_ID_HEADER, SESSION_HEADER, STATUS_HEADER};

const PROTOCOL: &str = "http";

/// Headers a handler may not set on an HTTP response.
const RESERVED_RESPONSE_HEADERS: [&str; 4] = [STATUS_HEADER, "content-length", "transfer-encoding", "connection"];

enum Outcome {
    Pending,
    Reply {
        status: StatusCode,
        headers: Vec<(String, String)>,
        body: Value,
    },
    Preflight,
    Failed(TransportError),
}

/// One inbound HTTP request/response cycle.
pub struct HttpConnector {
    id: ConnectorId,
    me: Weak<HttpConnector>,
    state: StateCell,
    session: String,
    target: Target,
    handler: Arc<dyn IncomingHandler>,
    outcome: Mutex<Outcome>,
}

impl HttpConnector {
    /// Born READY; `peer` is the remote socket address.
    pub fn inbound(session: String, peer: String, handler: Arc<dyn IncomingHandler>) -> Arc<Self> {
        let id = ConnectorId::new();
        let connector = Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            state: StateCell::new(Protocol::Http, id, ConnectorState::Init),
            session,
            target: Target::new(Protocol::Http, peer),
            handler,
            outcome: Mutex::new(Outcome::Pending),
        });
        connector.state.set(ConnectorState::Ready);
        connector
    }

    /// Adapt the request, dispatch it and finish the cycle.
    pub async fn handle(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8], rpc_id: u64) {
        match request::adapt(method, uri, headers, body, rpc_id) {
            Ok(Adapted::Preflight) => {
                self.settle(Outcome::Preflight);
            }
            Ok(Adapted::Packet(packet)) => {
                metrics::record_packet(PROTOCOL, "in", packet.opcode.as_str());
                if let Some(me) = self.me.upgrade() {
                    dispatch(self.handler.as_ref(), packet, &self.session, me).await;
                }
                if matches!(*lock(&self.outcome), Outcome::Pending) {
                    tracing::warn!(
                        connector_id = %self.id,
                        session = %self.session,
                        path = %uri.path(),
                        "Handler finished without a response"
                    );
                    self.settle(Outcome::Failed(TransportError::NoResponse));
                }
            }
            Err(e) => {
                tracing::warn!(
                    connector_id = %self.id,
                    method = %method,
                    path = %uri.path(),
                    error = %e,
                    "Rejected request"
                );
                self.settle(Outcome::Failed(e));
            }
        }
        self.state.set(ConnectorState::Closed);
    }

    /// The response written during the cycle; 500 `NO_RESPONSE` when none was.
    pub fn take_response(&self) -> Response {
        match std::mem::replace(&mut *lock(&self.outcome), Outcome::Pending) {
            Outcome::Reply { status, headers, body } => {
                let mut response = (status, Json(body)).into_response();
                for (name, value) in headers {
                    let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(name.as_bytes()),
                        header::HeaderValue::from_str(&value),
                    ) else {
                        continue;
                    };
                    response.headers_mut().insert(name, value);
                }
                response
            }
            Outcome::Preflight => StatusCode::OK.into_response(),
            Outcome::Failed(e) => e.into_response(),
            Outcome::Pending => TransportError::NoResponse.into_response(),
        }
    }

    /// End the cycle; later sends fail with `TunnelNotAvailable`.
    pub fn close(&self) {
        self.state.set(ConnectorState::Closed);
    }

    fn settle(&self, outcome: Outcome) -> bool {
        let mut current = lock(&self.outcome);
        if !matches!(*current, Outcome::Pending) {
            return false;
        }
        *current = outcome;
        true
    }

    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.state.get() == ConnectorState::Ready {
            Ok(())
        } else {
            Err(TransportError::TunnelNotAvailable {
                endpoint: self.target.endpoint.clone(),
            })
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn id(&self) -> ConnectorId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn state(&self) -> ConnectorState {
        self.state.get()
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    fn target(&self) -> Option<Target> {
        Some(self.target.clone())
    }

    fn session(&self) -> Option<String> {
        Some(self.session.clone())
    }

    fn is_available(&self) -> bool {
        self.state.get() == ConnectorState::Ready
    }

    async fn connect(&self, _target: &Target, _cancel: &CancellationToken) -> Result<(), TransportError> {
        self.ensure_ready()
    }

    async fn disconnect(&self) {
        self.close();
    }

    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if packet.opcode != OpCode::Response {
            return Err(TransportError::NotSupported("inbound HTTP connectors only send responses"));
        }

        let status = packet
            .header(STATUS_HEADER)
            .and_then(HeaderValue::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);
        let headers = packet
            .headers
            .iter()
            .filter(|(name, _)| !RESERVED_RESPONSE_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
            .collect();
        let body = match packet.payload {
            Value::Null => Value::Object(Map::new()),
            payload => payload,
        };

        if !self.settle(Outcome::Reply { status, headers, body }) {
            return Err(self.already_answered());
        }
        metrics::record_packet(PROTOCOL, "out", OpCode::Response.as_str());
        Ok(())
    }

    async fn send_raw(&self, raw: Value) -> Result<(), TransportError> {
        self.ensure_ready()?;
        let reply = Outcome::Reply {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: raw,
        };
        if !self.settle(reply) {
            return Err(self.already_answered());
        }
        Ok(())
    }
}

impl HttpConnector {
    fn already_answered(&self) -> TransportError {
        TransportError::Transport(format!("response already written for {}", self.target.endpoint))
    }
}

struct ClientLink {
    client: reqwest::Client,
    base: String,
}

/// Reusable HTTP client connector. Each send is one POST; answers to
/// REQUEST packets come back through the handler as RESPONSE packets.
pub struct HttpClientConnector {
    id: ConnectorId,
    me: Weak<HttpClientConnector>,
    state: StateCell,
    handler: Arc<dyn IncomingHandler>,
    request_timeout: Duration,
    link: Mutex<Option<ClientLink>>,
    target: Mutex<Option<Target>>,
    session: Mutex<Option<String>>,
}

impl HttpClientConnector {
    pub fn new(handler: Arc<dyn IncomingHandler>, request_timeout: Duration) -> Arc<Self> {
        let id = ConnectorId::new();
        Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            state: StateCell::new(Protocol::Http, id, ConnectorState::Init),
            handler,
            request_timeout,
            link: Mutex::new(None),
            target: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    fn not_available(&self) -> TransportError {
        TransportError::TunnelNotAvailable {
            endpoint: endpoint_of(&lock(&self.target)),
        }
    }

    fn request_for(&self, packet: &Packet) -> Result<reqwest::RequestBuilder, TransportError> {
        let link = lock(&self.link);
        let link = link.as_ref().ok_or_else(|| self.not_available())?;

        let path = match (&packet.path, &packet.service, &packet.method) {
            (Some(path), _, _) => path.clone(),
            (None, Some(service), Some(method)) => format!("/{service}/{method}"),
            (None, None, Some(method)) => format!("/{method}"),
            _ => return Err(TransportError::ProtocolMismatch("packet has no route".to_string())),
        };
        let body = match &packet.payload {
            Value::Null => Value::Object(Map::new()),
            payload => payload.clone(),
        };

        let mut builder = link.client.post(format!("{}{}", link.base, path)).json(&body);
        for (name, value) in &packet.headers {
            if name == STATUS_HEADER {
                continue;
            }
            match value {
                HeaderValue::Text(text) => builder = builder.header(name.as_str(), text.as_str()),
                HeaderValue::Number(number) => builder = builder.header(name.as_str(), number.to_string()),
            }
        }
        if let Some(session) = lock(&self.session).as_deref() {
            builder = builder.header(header::COOKIE, format!("{SESSION_HEADER}={session}"));
        }
        Ok(builder)
    }
}

#[async_trait]
impl Connector for HttpClientConnector {
    fn id(&self) -> ConnectorId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn state(&self) -> ConnectorState {
        self.state.get()
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    fn target(&self) -> Option<Target> {
        lock(&self.target).clone()
    }

    fn session(&self) -> Option<String> {
        lock(&self.session).clone()
    }

    fn is_available(&self) -> bool {
        self.state.get() == ConnectorState::Ready
    }

    async fn connect(&self, target: &Target, cancel: &CancellationToken) -> Result<(), TransportError> {
        match self.state.get() {
            ConnectorState::Ready => return Ok(()),
            state if state.is_terminal() => return Err(self.not_available()),
            _ => {}
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let base = match url::Url::parse(&target.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                url.as_str().trim_end_matches('/').to_string()
            }
            _ => {
                self.state.set(ConnectorState::Error);
                return Err(TransportError::InvalidOptions(format!(
                    "not an http endpoint: {}",
                    target.endpoint
                )));
            }
        };
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        *lock(&self.target) = Some(target.clone());
        *lock(&self.link) = Some(ClientLink { client, base });
        self.state.set(ConnectorState::Ready);
        tracing::info!(connector_id = %self.id, endpoint = %target.endpoint, "HTTP client ready");
        Ok(())
    }

    async fn disconnect(&self) {
        lock(&self.link).take();
        self.state.set(ConnectorState::Closed);
    }

    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(self.not_available());
        }
        if packet.opcode == OpCode::Response {
            return Err(TransportError::NotSupported("HTTP client connectors cannot send responses"));
        }

        let response = self.request_for(&packet)?.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.request_timeout.as_millis() as u64)
            } else {
                TransportError::Transport(e.to_string())
            }
        })?;
        metrics::record_packet(PROTOCOL, "out", packet.opcode.as_str());

        if response.status() != StatusCode::OK {
            return Err(TransportError::UnexpectedStatus(response.status().as_u16()));
        }
        if let Some(session) = session_from(response.headers()) {
            *lock(&self.session) = Some(session);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::BodyParseFailed(e.to_string()))?;

        if packet.opcode != OpCode::Request {
            return Ok(());
        }
        let mut reply = Packet::response_to(&packet, body);
        if !reply.headers.contains_key(RPC_ID_HEADER) {
            tracing::debug!(connector_id = %self.id, "Response without correlation id");
        }
        reply.service = packet.service.clone();
        reply.method = packet.method.clone();
        metrics::record_packet(PROTOCOL, "in", reply.opcode.as_str());

        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let session = self.session().unwrap_or_default();
        dispatch(self.handler.as_ref(), reply, &session, me).await;
        Ok(())
    }

    async fn send_raw(&self, _raw: Value) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("HTTP client connectors only carry packets"))
    }
}

/// Session assigned by the server: the `rpc-session` header, else the
/// `rpc-session` cookie from any `Set-Cookie`.
fn session_from(headers: &HeaderMap) -> Option<String> {
    if let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(session.to_string());
    }
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_HEADER && !value.trim().is_empty()).then(|| value.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{ChannelHandler, EchoHandler};
    use serde_json::json;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn inbound(handler: Arc<dyn IncomingHandler>) -> Arc<HttpConnector> {
        HttpConnector::inbound("session-1".into(), "127.0.0.1:5000".into(), handler)
    }

    #[tokio::test]
    async fn echo_round_trip_closes_connector() {
        let connector = inbound(Arc::new(EchoHandler));
        assert_eq!(connector.state(), ConnectorState::Ready);

        let uri: Uri = "/svc/echo".parse().unwrap();
        connector
            .handle(&Method::POST, &uri, &HeaderMap::new(), br#"{"a":1}"#, 1)
            .await;

        assert_eq!(connector.state(), ConnectorState::Closed);
        let response = connector.take_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"error": null, "result": {"a": 1}}));

        let late = connector.send(Packet::new(OpCode::Response, Value::Null)).await;
        assert!(matches!(late, Err(TransportError::TunnelNotAvailable { .. })));
    }

    #[tokio::test]
    async fn handler_without_reply_is_no_response() {
        let (handler, mut rx) = ChannelHandler::new();
        let connector = inbound(Arc::new(handler));
        let uri: Uri = "/svc/fire".parse().unwrap();
        connector.handle(&Method::POST, &uri, &HeaderMap::new(), b"{}", 9).await;

        assert_eq!(rx.recv().await.unwrap().session, "session-1");
        let response = connector.take_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"]["code"], "NO_RESPONSE");
    }

    #[tokio::test]
    async fn status_header_overrides_status() {
        let connector = inbound(Arc::new(EchoHandler));
        let reply = Packet::new(OpCode::Response, json!({"error": null, "result": 1}))
            .with_header(STATUS_HEADER, 201u16)
            .with_header("x-extra", "yes");
        connector.send(reply).await.unwrap();

        let response = connector.take_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-extra"], "yes");
        assert!(response.headers().get(STATUS_HEADER).is_none());
    }

    #[tokio::test]
    async fn inbound_rejects_non_responses() {
        let connector = inbound(Arc::new(EchoHandler));
        let err = connector
            .send(Packet::notify("svc", "m", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotSupported(_)));
    }

    #[tokio::test]
    async fn client_send_before_connect_fails_fast() {
        let client = HttpClientConnector::new(Arc::new(EchoHandler), Duration::from_secs(1));
        let err = client
            .send(Packet::request("svc", "m", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TunnelNotAvailable { .. }));
        assert!(matches!(
            client.send_raw(json!({})).await,
            Err(TransportError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn client_connect_validates_scheme() {
        let client = HttpClientConnector::new(Arc::new(EchoHandler), Duration::from_secs(1));
        let target = Target::new(Protocol::Http, "ws://127.0.0.1:1");
        let err = client.connect(&target, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidOptions(_)));
        assert_eq!(client.state(), ConnectorState::Error);
    }

    #[test]
    fn session_falls_back_to_set_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, "theme=dark; Path=/".parse().unwrap());
        headers.append(
            header::SET_COOKIE,
            format!("{SESSION_HEADER}=from-cookie; Path=/; HttpOnly").parse().unwrap(),
        );
        assert_eq!(session_from(&headers).as_deref(), Some("from-cookie"));

        headers.insert(SESSION_HEADER, "from-header".parse().unwrap());
        assert_eq!(session_from(&headers).as_deref(), Some("from-header"));

        assert_eq!(session_from(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn preflight_answers_ok_without_dispatch() {
        let (handler, mut rx) = ChannelHandler::new();
        let connector = inbound(Arc::new(handler));
        let uri: Uri = "/svc/m".parse().unwrap();
        connector.handle(&Method::OPTIONS, &uri, &HeaderMap::new(), b"", 2).await;

        assert_eq!(connector.take_response().status(), StatusCode::OK);
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert!(rx.try_recv().is_err());
    }
}
