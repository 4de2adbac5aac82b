//! Tracing and logging setup for tickflow.
//!
//! Process-wide, init-once. The core crates only depend on the
//! `tracing` macros; wiring a subscriber is the embedding
//! application's choice, and this crate provides the default one.

pub mod error;
pub mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
