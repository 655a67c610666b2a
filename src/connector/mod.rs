//! Connectors: one logical channel to one peer.
//!
//! # Data Flow
//! ```text
//! Inbound:  socket frame / HTTP request
//!     → connector (decode + validate)
//!     → rpc::dispatch (IncomingHandler with session + connector)
//!
//! Outbound: handler or Sender
//!     → connector.send (fails fast unless READY)
//!     → socket write / HTTP response / one-shot HTTP request
//! ```
//!
//! # Variants
//! - `HttpConnector`: one inbound request/response cycle, born READY
//! - `HttpClientConnector`: reusable request-issuing client
//! - `WebSocketConnector`: accepted socket, or outbound with reconnect

pub mod http;
pub mod state;
pub mod websocket;

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Labels;
use crate::error::TransportError;
use crate::net::connection::ConnectorId;
use crate::rpc::Packet;

pub use self::http::{HttpClientConnector, HttpConnector};
pub use self::state::{ConnectorState, StateCell, StateChange};
pub use self::websocket::{Heartbeat, WebSocketConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "ws")]
    WebSocket,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::WebSocket => "ws",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "ws" => Ok(Protocol::WebSocket),
            other => Err(TransportError::InvalidOptions(format!("unknown protocol {other:?}"))),
        }
    }
}

/// Identifies the remote peer or upstream of a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub protocol: Protocol,
    pub endpoint: String,
    #[serde(default)]
    pub labels: Labels,
}

impl Target {
    pub fn new(protocol: Protocol, endpoint: impl Into<String>) -> Self {
        Self {
            protocol,
            endpoint: endpoint.into(),
            labels: Labels::new(),
        }
    }

    /// Infer the protocol from the endpoint scheme (`http`/`https`, `ws`/`wss`).
    pub fn from_endpoint(endpoint: &str) -> Result<Self, TransportError> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| TransportError::InvalidOptions(format!("invalid endpoint {endpoint:?}: {e}")))?;
        let protocol = match url.scheme() {
            "http" | "https" => Protocol::Http,
            "ws" | "wss" => Protocol::WebSocket,
            other => {
                return Err(TransportError::InvalidOptions(format!(
                    "unsupported scheme {other:?}"
                )))
            }
        };
        Ok(Self::new(protocol, endpoint))
    }
}

/// Uniform contract over one transport channel.
#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> ConnectorId;

    fn protocol(&self) -> Protocol;

    fn state(&self) -> ConnectorState;

    /// Stream of state transitions, each emitted once.
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;

    fn target(&self) -> Option<Target>;

    fn session(&self) -> Option<String>;

    /// True only when a message can be carried right now.
    fn is_available(&self) -> bool;

    /// Establish the channel. A no-op when already available.
    async fn connect(&self, target: &Target, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Tear the channel down. Best effort, never fails.
    async fn disconnect(&self);

    async fn send(&self, packet: Packet) -> Result<(), TransportError>;

    /// Transmit a value without envelope validation.
    async fn send_raw(&self, raw: Value) -> Result<(), TransportError>;
}

/// Endpoint string for error messages.
pub(crate) fn endpoint_of(target: &Option<Target>) -> String {
    target
        .as_ref()
        .map(|t| t.endpoint.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Lock a std mutex, ignoring poisoning. Never hold the guard across `.await`.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_endpoint_scheme() {
        assert_eq!(
            Target::from_endpoint("ws://127.0.0.1:9000/ws").unwrap().protocol,
            Protocol::WebSocket
        );
        assert_eq!(
            Target::from_endpoint("http://localhost:8080").unwrap().protocol,
            Protocol::Http
        );
        assert!(Target::from_endpoint("ftp://host").is_err());
        assert!(Target::from_endpoint("not a url").is_err());
    }

    #[test]
    fn protocol_round_trips_through_str() {
        for protocol in [Protocol::Http, Protocol::WebSocket] {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
    }
}
