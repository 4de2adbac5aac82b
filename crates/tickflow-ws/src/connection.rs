//! WebSocket connection manager.
//!
//! Handles connection lifecycle, ordered URL fallback, automatic
//! reconnection with exponential backoff, and the socket.io-style
//! handshake. Everything above this layer sees only [`TransportEvent`]s
//! and a [`WriteHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tickflow_core::Outgoing;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{WsError, WsResult};
use crate::frame::{self, Frame};
use crate::write_handle::WriteHandle;

/// Event emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// First successful establishment of a usable connection.
    Connected,
    /// Inbound feed message, binary frames decoded lossily to text.
    /// Control frames (open/ping/pong/namespace ack) are consumed by
    /// the manager and never appear here.
    Message(Arc<str>),
    /// The socket dropped; the manager will retry unless shut down.
    Disconnected { reason: String },
    /// A new connection is established after a drop. Subscribers with
    /// keep-alive messages should replay them on this signal.
    Reconnected,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Ordered fallback endpoint list; tried first to last each attempt.
    pub urls: Vec<String>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Opaque auth message replayed once the namespace opens. The
    /// session token inside is never inspected.
    pub auth_message: Option<String>,
    /// Whether the session is against a practice account.
    pub demo: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 5000,
            reconnect_max_delay_ms: 60000,
            auth_message: None,
            demo: true,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<TransportEvent>,
    reconnect_count: Arc<RwLock<u32>>,
    /// True once a usable connection has been established at least once.
    established_once: AtomicBool,
    /// Outbound message sender (for WriteHandle).
    outbound_tx: mpsc::Sender<Outgoing>,
    /// Outbound message receiver (consumed by the message loop).
    outbound_rx: Arc<TokioMutex<mpsc::Receiver<Outgoing>>>,
    /// Signal to tear the current socket down and redial.
    reconnect_signal: Notify,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<TransportEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            event_tx,
            reconnect_count: Arc::new(RwLock::new(0)),
            established_once: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            reconnect_signal: Notify::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a write handle for sending messages.
    pub fn write_handle(&self) -> WriteHandle {
        WriteHandle::new(self.outbound_tx.clone(), self.state.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_demo(&self) -> bool {
        self.config.demo
    }

    /// Tear the current socket down and redial. Registered handlers
    /// and subscriptions survive; keep-alive replay restores
    /// server-side state once the new socket is up.
    pub fn reconnect(&self) {
        info!("Manual reconnect requested");
        self.reconnect_signal.notify_one();
    }

    /// Signal graceful shutdown; both the message loop and the
    /// reconnect loop exit promptly.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect to the feed and run the message loop until shutdown or
    /// the reconnection attempts are exhausted.
    pub async fn run(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;

            match self.try_session().await {
                Ok(()) => {
                    info!("WebSocket connection closed");
                }
                Err(e) => {
                    error!(?e, "WebSocket connection error");
                    let _ = self
                        .event_tx
                        .send(TransportEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await;
                }
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            attempt += 1;
            *self.reconnect_count.write() = attempt;

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;

            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting");

            // Wait for delay OR shutdown signal (cancellation-aware sleep)
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    /// Open a socket against the first reachable endpoint, in list order.
    async fn connect_any(
        &self,
    ) -> WsResult<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    > {
        if self.config.urls.is_empty() {
            return Err(WsError::ConnectionFailed(
                "no endpoint urls configured".to_string(),
            ));
        }
        for url in &self.config.urls {
            info!(url = %url, "Connecting to feed");
            match connect_async_tls_with_config(url, None, true, None).await {
                Ok((ws_stream, _response)) => return Ok(ws_stream),
                Err(e) => warn!(url = %url, ?e, "Endpoint failed, trying next"),
            }
        }
        Err(WsError::ConnectionFailed(
            "failed to connect to any of the configured urls".to_string(),
        ))
    }

    async fn try_session(&self) -> WsResult<()> {
        let ws_stream = self.connect_any().await?;
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        *self.reconnect_count.write() = 0;
        info!("WebSocket connected, awaiting handshake");

        // Message loop
        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                // Shutdown signal - highest priority
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                // Manual reconnect request
                () = self.reconnect_signal.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Err(WsError::ConnectionClosed {
                        code: 1000,
                        reason: "reconnect requested".to_string(),
                    });
                }

                // Incoming message
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_frame(&text, &mut write).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            // Binary frames carry JSON; the routing layer
                            // works on their lossy text view.
                            let text = String::from_utf8_lossy(&data).into_owned();
                            self.forward(text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(cause))) => {
                            let (code, reason) = cause
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                // Outbound message
                outbound = outbound_recv => {
                    if let Some(msg) = outbound {
                        match msg {
                            Outgoing::Text(text) => {
                                write.send(Message::Text(text)).await?;
                            }
                            Outgoing::Binary(data) => {
                                write.send(Message::Binary(data)).await?;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_text_frame(
        &self,
        text: &str,
        write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
                  + Unpin),
    ) -> WsResult<()> {
        match frame::classify(text) {
            Frame::Open(_) => {
                debug!("Transport open, acknowledging namespace");
                write
                    .send(Message::Text(frame::NAMESPACE_OPEN.to_string()))
                    .await?;
            }
            Frame::Ping => {
                write.send(Message::Text(frame::PONG.to_string())).await?;
            }
            Frame::Pong => {}
            Frame::NamespaceAck(_) => {
                if let Some(auth) = &self.config.auth_message {
                    debug!("Namespace acknowledged, sending auth message");
                    write.send(Message::Text(auth.clone())).await?;
                }
                let event = if self.established_once.swap(true, Ordering::SeqCst) {
                    info!("Feed connection re-established");
                    TransportEvent::Reconnected
                } else {
                    info!("Feed connection established");
                    TransportEvent::Connected
                };
                let _ = self.event_tx.send(event).await;
            }
            Frame::Event(_) | Frame::BinaryPreamble(_) | Frame::Other(_) => {
                self.forward(text.to_string()).await;
            }
        }
        Ok(())
    }

    async fn forward(&self, text: String) {
        if self
            .event_tx
            .send(TransportEvent::Message(Arc::from(text)))
            .await
            .is_err()
        {
            warn!("Event receiver dropped");
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // Exponential backoff: base * 2^(attempt-1), capped.
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent);
        let delay = delay.min(max);

        // Add jitter (0-1000ms)
        Duration::from_millis(delay + rand_jitter())
    }
}

/// Generate random jitter (0-1000ms).
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0); // Infinite
        assert_eq!(config.reconnect_base_delay_ms, 5000);
        assert!(config.demo);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(
            ConnectionConfig {
                reconnect_base_delay_ms: 1000,
                reconnect_max_delay_ms: 8000,
                ..Default::default()
            },
            event_tx,
        );

        let d1 = manager.calculate_backoff_delay(1).as_millis() as u64;
        let d2 = manager.calculate_backoff_delay(2).as_millis() as u64;
        let d4 = manager.calculate_backoff_delay(4).as_millis() as u64;
        let d9 = manager.calculate_backoff_delay(9).as_millis() as u64;

        // Jitter adds at most one second on top of the deterministic part.
        assert!((1000..2000).contains(&d1));
        assert!((2000..3000).contains(&d2));
        assert!((8000..9000).contains(&d4));
        assert!((8000..9000).contains(&d9)); // capped
    }

    #[tokio::test]
    async fn run_fails_without_urls() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(
            ConnectionConfig {
                urls: Vec::new(),
                max_reconnect_attempts: 1,
                ..Default::default()
            },
            event_tx,
        );
        let result = manager.run().await;
        assert!(matches!(result, Err(WsError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn shutdown_stops_run_loop() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let manager = Arc::new(ConnectionManager::new(
            ConnectionConfig {
                urls: vec!["wss://127.0.0.1:1".to_string()],
                reconnect_base_delay_ms: 10_000,
                ..Default::default()
            },
            event_tx,
        ));

        let runner = manager.clone();
        let task = tokio::spawn(async move { runner.run().await });

        // Let the first attempt fail and the backoff start, then cancel.
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("run loop did not stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
