//! Transport error types.

use thiserror::Error;
use tickflow_core::CoreError;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Handshake did not complete: {0}")]
    Handshake(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<WsError> for CoreError {
    fn from(e: WsError) -> Self {
        CoreError::Connection(e.to_string())
    }
}

pub type WsResult<T> = std::result::Result<T, WsError>;
