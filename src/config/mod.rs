//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransportConfig (validated, immutable)
//!     → handed to listeners, registry and sender at startup
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A fixed port and a port range on the same listener is a validation error

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ClientConfig, HeartbeatConfig, HttpListenerConfig, Labels, ListenerOptions, ObservabilityConfig,
    PortBindingConfig, ReconnectConfig, ShutdownConfig, TransportConfig, WebSocketListenerConfig,
};
