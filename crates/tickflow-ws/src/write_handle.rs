//! Channel-based write handle for outbound sends.
//!
//! The handle can be cloned and shared across tasks. Sends are queued
//! on a channel drained by the connection manager's message loop, which
//! makes them reconnect-safe: messages queued while the socket is down
//! are flushed once the new socket is up.

use std::sync::Arc;

use parking_lot::RwLock;
use tickflow_core::Outgoing;
use tokio::sync::mpsc;

use crate::connection::ConnectionState;
use crate::error::{WsError, WsResult};

/// Write handle for sending messages to the feed.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<Outgoing>,
    state: Arc<RwLock<ConnectionState>>,
}

impl WriteHandle {
    pub fn new(tx: mpsc::Sender<Outgoing>, state: Arc<RwLock<ConnectionState>>) -> Self {
        Self { tx, state }
    }

    /// Queue an outbound message.
    ///
    /// Fails only when the connection manager is gone; a temporarily
    /// dropped socket keeps the queue alive.
    pub async fn send(&self, message: Outgoing) -> WsResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| WsError::SendFailed("connection manager is gone".to_string()))
    }

    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.send(Outgoing::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        self.send(Outgoing::Binary(data.into())).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected && !self.tx.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle(
        state: ConnectionState,
    ) -> (WriteHandle, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = WriteHandle::new(tx, Arc::new(RwLock::new(state)));
        (handle, rx)
    }

    #[tokio::test]
    async fn send_text_queues_message() {
        let (handle, mut rx) = create_test_handle(ConnectionState::Connected);
        handle.send_text("42[\"ping\"]").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Outgoing::Text("42[\"ping\"]".into()));
    }

    #[tokio::test]
    async fn send_queues_even_while_reconnecting() {
        let (handle, mut rx) = create_test_handle(ConnectionState::Reconnecting);
        assert!(!handle.is_connected());
        handle.send_binary(vec![1, 2, 3]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Outgoing::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn send_fails_when_manager_is_gone() {
        let (handle, rx) = create_test_handle(ConnectionState::Connected);
        drop(rx);
        assert!(handle.send_text("x").await.is_err());
        assert!(handle.is_closed());
    }
}
