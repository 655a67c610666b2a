//! RPC envelope and the dispatch boundary.
//!
//! # Data Flow
//! ```text
//! bytes from a connector
//!     → packet.rs (decode + shape validation)
//!     → dispatch.rs (IncomingHandler, failures contained and logged)
//!     → handler replies through the same connector
//! ```

pub mod dispatch;
pub mod packet;

pub use dispatch::{dispatch, ChannelHandler, Delivery, EchoHandler, HandlerError, IncomingHandler};
pub use packet::{
    HeaderValue, Headers, OpCode, Packet, COMMAND_HEADER, COMMAND_OFF, RPC_ID_HEADER, SESSION_HEADER,
    STATUS_HEADER,
};
