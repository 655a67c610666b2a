//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerOptions
//!     → port.rs (fixed port or free port inside a range)
//!     → listener.rs (ListenerCore: lifecycle, connector map, rpc-id)
//!     → connection.rs (connector ids, live-channel tracking for drain)
//!     → handed to the HTTP or WebSocket server
//! ```
//!
//! # Design Decisions
//! - Binding is the only step that may fail `listen()`; later server errors
//!   move the listener to ERROR instead
//! - Each live channel is tracked so shutdown can wait for peers to leave

pub mod connection;
pub mod listener;
pub mod port;

pub use listener::{Listener, ListenerCore, ListenerMetadata, ListenerState, Registration};
pub use port::{bind_port, PortSpec};
