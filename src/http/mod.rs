//! HTTP request/response transport.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → listener.rs (axum fallback route, trace + timeout layers)
//!     → session.rs (cookie / header / minted session id)
//!     → HttpConnector (request.rs adaptation, dispatch, response)
//!     → response sent once the connector has finished
//! ```

pub mod listener;
pub mod request;
pub mod session;

pub use listener::HttpListener;
pub use request::{adapt, Adapted};
pub use session::Session;
