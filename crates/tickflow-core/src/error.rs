//! Error taxonomy shared across the tickflow crates.

use thiserror::Error;
use uuid::Uuid;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport unavailable or dropped mid-wait with no timely recovery.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed predicate construction or a failing custom predicate.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A wait exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Inbound payload could not be parsed into the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value, or mutation of a locked configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation attempted on a deregistered handler.
    #[error("Handler {0} is closed")]
    HandlerClosed(Uuid),
}

impl From<regex::Error> for CoreError {
    fn from(e: regex::Error) -> Self {
        CoreError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Protocol(e.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
