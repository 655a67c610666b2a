//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound connect:
//!     → retry.rs (attempt, report failure, honour cancellation)
//!     → backoff.rs (delay before the next attempt, capped, reset on success)
//! ```
//!
//! # Design Decisions
//! - Every sequence starts from a fresh backoff, so a stable connection never
//!   inherits delays from an earlier flaky period
//! - Unbounded retry is the default for client connectors; only cancellation
//!   ends it

pub mod backoff;
pub mod retry;

pub use backoff::Backoff;
pub use retry::{retry, RetryEvent, RetryPolicy};
