//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → build enabled listeners → bind → READY
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → notify peers → drain → close
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::shutdown_listeners;
pub use signals::shutdown_signal;
pub use startup::start_listeners;
