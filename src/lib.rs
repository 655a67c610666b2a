//! RPC transport layer.
//!
//! Carries one call/notify/response protocol over HTTP request/response and
//! persistent WebSocket connections behind a single `Connector` contract.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────┐
//!                 │                  RPC TRANSPORT                    │
//!                 │                                                   │
//!   HTTP request  │  ┌──────────┐   ┌──────────────┐   ┌───────────┐ │
//!   ──────────────┼─▶│   http   │──▶│ HttpConnector│──▶│           │ │
//!                 │  │ listener │   └──────────────┘   │ Incoming  │ │
//!   WS upgrade    │  ├──────────┤   ┌──────────────┐   │ Handler   │ │
//!   ──────────────┼─▶│websocket │──▶│ WebSocket    │──▶│ (rpc)     │ │
//!                 │  │ listener │   │ Connector    │   │           │ │
//!                 │  └────┬─────┘   └──────────────┘   └─────┬─────┘ │
//!                 │       │ net: port binder, ListenerCore    │       │
//!                 │       ▼                                   ▼       │
//!                 │  ┌─────────┐  ┌──────────┐  ┌──────────────────┐  │
//!                 │  │ Sender  │─▶│ Registry │─▶│ client connectors│──┼──▶ remote
//!                 │  └─────────┘  └──────────┘  │ (retry, backoff) │  │    listener
//!                 │                             └──────────────────┘  │
//!                 │  config · observability · resilience · lifecycle  │
//!                 └──────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod rpc;
pub mod sender;
pub mod websocket;

pub use config::TransportConfig;
pub use connector::{Connector, ConnectorState, Protocol, Target};
pub use error::TransportError;
pub use http::HttpListener;
pub use net::{Listener, ListenerMetadata, ListenerState};
pub use registry::TransportRegistry;
pub use rpc::{IncomingHandler, OpCode, Packet};
pub use sender::Sender;
pub use websocket::WebSocketListener;
