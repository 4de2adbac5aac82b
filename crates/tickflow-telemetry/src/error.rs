//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization error: {0}")]
    LoggingInit(String),
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;
