//! WebSocket transport adapter for the tickflow feed client.
//!
//! Provides robust feed connectivity with:
//! - Ordered URL fallback and automatic reconnection with backoff
//! - socket.io-style handshake and ping/pong handling
//! - Channel-based write handle, reconnect-safe
//! - A transport event stream consumed by the routing layer

pub mod connection;
pub mod error;
pub mod frame;
pub mod write_handle;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, TransportEvent};
pub use error::{WsError, WsResult};
pub use frame::{classify, Frame};
pub use write_handle::WriteHandle;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
