//! Suspending client facade.
//!
//! Wires the transport, the multiplexer and the subscription registry
//! together and exposes the caller-facing operations. One client owns
//! one physical connection; all sends are serialized through it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tickflow_candles::Policy;
use tickflow_core::{Candle, Config, CoreError, CoreResult, Outgoing, ServerTime, Validator};
use tickflow_router::{Multiplexer, RawHandle};
use tickflow_ws::{ConnectionConfig, ConnectionManager, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::error;

use crate::history;
use crate::parser;
use crate::registry::{CandleStream, SubscriptionRegistry, TickStream};

/// Options for establishing a session.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Pre-built auth frame replayed after the namespace opens. Opaque
    /// to the client; credential semantics live with the caller.
    pub auth_message: Option<String>,
    /// Whether the session targets a practice account.
    pub demo: bool,
}

/// Suspending feed client.
///
/// Building a client locks its [`Config`] permanently.
pub struct Client {
    config: Arc<Config>,
    mux: Multiplexer,
    registry: SubscriptionRegistry,
    connection: Arc<ConnectionManager>,
    server_time: Arc<RwLock<ServerTime>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Connect to the first reachable configured endpoint and wait for
    /// a usable session, bounded by the configured initialization
    /// timeout.
    pub async fn connect(config: Config, options: ConnectOptions) -> CoreResult<Self> {
        if config.urls().is_empty() {
            return Err(CoreError::Config(
                "at least one endpoint url is required".to_string(),
            ));
        }
        tickflow_ws::init_crypto();
        config.lock();
        let config = Arc::new(config);

        let connection_config = ConnectionConfig {
            urls: config.urls(),
            max_reconnect_attempts: config.max_allowed_loops(),
            reconnect_base_delay_ms: config.reconnect_time().as_millis() as u64,
            reconnect_max_delay_ms: 60_000,
            auth_message: options.auth_message,
            demo: options.demo,
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let connection = Arc::new(ConnectionManager::new(connection_config, event_tx));
        let writer = connection.write_handle();
        let mux = Multiplexer::new(writer.clone(), config.clone());
        let registry = SubscriptionRegistry::new(mux.clone(), writer);
        let server_time = Arc::new(RwLock::new(ServerTime::default()));

        let runner = {
            let connection = connection.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.run().await {
                    error!(error = %e, "Connection manager exited");
                }
            })
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let router = tokio::spawn(event_loop(
            mux.clone(),
            event_rx,
            server_time.clone(),
            ready_tx,
        ));

        let init_timeout = config.connection_initialization_timeout();
        if !matches!(
            tokio::time::timeout(init_timeout, ready_rx).await,
            Ok(Ok(()))
        ) {
            connection.shutdown();
            runner.abort();
            router.abort();
            return Err(CoreError::Connection(format!(
                "connection was not established within {init_timeout:?}"
            )));
        }

        Ok(Self {
            config,
            mux,
            registry,
            connection,
            server_time,
            tasks: vec![runner, router],
        })
    }

    /// The locked configuration this client was built from.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Register a raw handler for messages matching `validator`. An
    /// optional keep-alive message is resent after every reconnection.
    pub fn create_handler(
        &self,
        validator: Validator,
        keep_alive: Option<Outgoing>,
    ) -> RawHandle {
        self.mux.register(validator, keep_alive)
    }

    /// Subscribe to an asset's raw tick stream.
    pub async fn subscribe_symbol(&self, asset: &str) -> CoreResult<TickStream> {
        self.registry.subscribe_ticks(asset).await
    }

    /// Subscribe to candles built from exactly `size` ticks each.
    pub async fn subscribe_symbol_chunked(
        &self,
        asset: &str,
        size: usize,
    ) -> CoreResult<CandleStream> {
        self.registry
            .subscribe_candles(asset, Policy::Chunked(size))
            .await
    }

    /// Subscribe to candles over elapsed-time windows of `duration`.
    pub async fn subscribe_symbol_timed(
        &self,
        asset: &str,
        duration: Duration,
    ) -> CoreResult<CandleStream> {
        self.registry
            .subscribe_candles(asset, Policy::Timed(duration))
            .await
    }

    /// Subscribe to candles over windows aligned to multiples of
    /// `duration`.
    pub async fn subscribe_symbol_time_aligned(
        &self,
        asset: &str,
        duration: Duration,
    ) -> CoreResult<CandleStream> {
        self.registry
            .subscribe_candles(asset, Policy::TimeAligned(duration))
            .await
    }

    /// Close every subscription registered for the asset.
    pub async fn unsubscribe(&self, asset: &str) -> CoreResult<()> {
        self.registry.unsubscribe(asset).await
    }

    /// Retrieve historical candles; empty on timeout, never an error
    /// for the timeout case.
    pub async fn get_candles(
        &self,
        asset: &str,
        period: i64,
        offset: i64,
    ) -> CoreResult<Vec<Candle>> {
        history::get_candles(&self.mux, asset, period, offset).await
    }

    /// Estimated current server time as a Unix timestamp, derived from
    /// tick timestamps seen on the feed.
    pub fn server_time(&self) -> i64 {
        self.server_time.read().now()
    }

    pub fn is_demo(&self) -> bool {
        self.connection.is_demo()
    }

    /// Drop the current socket and redial. Handlers, subscriptions and
    /// their keep-alives survive the cycle.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Shut the connection down. Streams observe their terminal
    /// condition; the client cannot be reconnected afterwards.
    pub fn disconnect(&self) {
        self.connection.shutdown();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn event_loop(
    mux: Multiplexer,
    mut event_rx: mpsc::Receiver<TransportEvent>,
    server_time: Arc<RwLock<ServerTime>>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    while let Some(event) = event_rx.recv().await {
        match &event {
            TransportEvent::Connected | TransportEvent::Reconnected => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            TransportEvent::Message(text) => {
                // Every tick carries the server's clock.
                if let Some(tick) = parser::parse_tick(text) {
                    server_time.write().update(tick.timestamp);
                }
            }
            TransportEvent::Disconnected { .. } => {}
        }
        mux.handle_event(event).await;
    }
}
