//! # Common infrastructure for the callcore stack
//!
//! Shared building blocks used by `media-core` and `session-core`:
//!
//! - [`logging`] - `tracing` subscriber setup for applications and tests
//! - [`dispatch`] - single-threaded task queues used to serialize
//!   notifications and transport callbacks
//! - [`errors`] - the common error type

pub mod dispatch;
pub mod errors;
pub mod logging;

pub use dispatch::DispatchQueue;
pub use errors::{Error, Result};
pub use logging::{setup_logging, LoggingConfig};
