//! Transport error taxonomy and the JSON error envelope returned to HTTP callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced by listeners, connectors and the sender.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Port already in use. Retried internally by the port binder.
    #[error("port {0} is already in use")]
    BindConflict(u16),

    /// Every port of the configured range was tried.
    #[error("no available port in range {min}-{max}")]
    NoAvailablePort { min: u16, max: u16 },

    /// Bind failed for a reason other than a port conflict.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Send attempted on a connector that is not ready.
    #[error("tunnel not available, endpoint={endpoint}")]
    TunnelNotAvailable { endpoint: String },

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("body parse failed: {0}")]
    BodyParseFailed(String),

    /// Socket-level failure on an established channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Decoded JSON does not match the packet envelope.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Connection attempt failed; retryable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Peer rejected the upgrade; not retryable.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("no route for path {0}")]
    RouteNotFound(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("handler produced no response")]
    NoResponse,

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Severity attached to error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Info,
    Warn,
    Error,
    Fatal,
}

impl TransportError {
    /// Stable machine-readable code used in error envelopes.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BindConflict(_) => "BIND_CONFLICT",
            Self::NoAvailablePort { .. } => "NO_AVAILABLE_PORT",
            Self::Bind(_) => "BIND_FAILED",
            Self::InvalidOptions(_) => "INVALID_OPTIONS",
            Self::TunnelNotAvailable { .. } => "TUNNEL_NOT_AVAILABLE",
            Self::NotSupported(_) => "NOT_SUPPORTED",
            Self::BodyParseFailed(_) => "BODY_PARSE_FAILED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::ProtocolMismatch(_) => "PROTOCOL_MISMATCH",
            Self::Connection(_) => "CONNECTION_FAILED",
            Self::Handshake(_) => "HANDSHAKE_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::UnexpectedStatus(_) => "UNEXPECTED_STATUS",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::NoResponse => "NO_RESPONSE",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    pub const fn level(&self) -> ErrorLevel {
        match self {
            Self::BodyParseFailed(_)
            | Self::ProtocolMismatch(_)
            | Self::MethodNotAllowed(_)
            | Self::RouteNotFound(_)
            | Self::PayloadTooLarge => ErrorLevel::Warn,
            Self::Cancelled => ErrorLevel::Info,
            Self::NoAvailablePort { .. } | Self::Bind(_) | Self::InvalidOptions(_) => {
                ErrorLevel::Fatal
            }
            _ => ErrorLevel::Error,
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BodyParseFailed(_) | Self::ProtocolMismatch(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::TunnelNotAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a connect attempt failing with this error may be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transport(_) | Self::BindConflict(_) | Self::Timeout(_)
        )
    }
}

/// Error half of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub level: ErrorLevel,
    pub message: String,
    pub name: String,
}

impl From<&TransportError> for ErrorBody {
    fn from(err: &TransportError) -> Self {
        Self {
            code: err.code().to_string(),
            level: err.level(),
            message: err.code().to_string(),
            name: "TransportError".to_string(),
        }
    }
}

/// `{"error": ..., "result": ...}` payload of RESPONSE packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub error: Option<ErrorBody>,
    pub result: Value,
}

impl ResponseEnvelope {
    pub fn ok(result: Value) -> Self {
        Self { error: None, result }
    }

    pub fn failure(err: &TransportError) -> Self {
        Self {
            error: Some(ErrorBody::from(err)),
            result: Value::Null,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ResponseEnvelope::failure(&self))).into_response()
    }
}
