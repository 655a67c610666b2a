//! Persistent WebSocket transport.
//!
//! # Data Flow
//! ```text
//! HTTP upgrade on entry_path
//!     → listener.rs (session id, WebSocketConnector, registration)
//!     → connector read loop (decode, validate, dispatch in order)
//!     → handler replies through connector.send (writer task)
//! ```

pub mod listener;

pub use listener::WebSocketListener;
