//! Fan-out routing of the inbound message stream.
//!
//! The multiplexer owns the registry of live handlers. Every inbound
//! message is evaluated against each handler's validator in
//! registration order; a match resolves at most one pending one-shot
//! waiter (FIFO) and is pushed to every persistent subscriber queue.
//! The two sinks are independent.
//!
//! Dispatch never awaits and never blocks on a consumer: one-shot
//! delivery is a oneshot send, subscriber delivery an unbounded channel
//! send. A stalled consumer grows only its own queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tickflow_core::{Config, CoreError, Outgoing, Validator};
use tickflow_ws::{TransportEvent, WriteHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handle::{RawHandle, RawStream};

/// Why a pending waiter was failed instead of resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WaiterError {
    /// The handler was deregistered.
    Closed(Uuid),
    /// The connection dropped and did not recover within the
    /// initialization timeout.
    ConnectionLost,
}

impl From<WaiterError> for CoreError {
    fn from(e: WaiterError) -> Self {
        match e {
            WaiterError::Closed(id) => CoreError::HandlerClosed(id),
            WaiterError::ConnectionLost => {
                CoreError::Connection("connection dropped while waiting for a match".to_string())
            }
        }
    }
}

pub(crate) type WaiterResult = std::result::Result<Arc<str>, WaiterError>;

/// Item delivered on a persistent subscriber queue.
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Message(Arc<str>),
    /// Terminal item: the connection failed without recovering.
    Terminated { reason: String },
}

struct HandlerEntry {
    id: Uuid,
    validator: Validator,
    keep_alive: Option<Outgoing>,
    /// Pending one-shot waiters, oldest first.
    waiters: VecDeque<oneshot::Sender<WaiterResult>>,
    /// Per-consumer queues, decoupled from dispatch.
    subscribers: Vec<mpsc::UnboundedSender<StreamItem>>,
}

enum LinkState {
    Up,
    Down { generation: u64 },
}

struct Registry {
    /// Registration order is dispatch order.
    handlers: Vec<HandlerEntry>,
    link: LinkState,
    /// Bumped on every disconnect so a stale grace timer can tell that
    /// the link it watched has since recovered.
    generation: u64,
}

/// The message multiplexer. Cheap to clone; all clones share one
/// registry.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Mutex<Registry>>,
    writer: WriteHandle,
    config: Arc<Config>,
}

impl Multiplexer {
    pub fn new(writer: WriteHandle, config: Arc<Config>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                handlers: Vec::new(),
                link: LinkState::Up,
                generation: 0,
            })),
            writer,
            config,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub(crate) fn writer(&self) -> &WriteHandle {
        &self.writer
    }

    /// Register a handler. The returned handle deregisters it on
    /// explicit `close` or on drop.
    pub fn register(&self, validator: Validator, keep_alive: Option<Outgoing>) -> RawHandle {
        let id = Uuid::new_v4();
        self.inner.lock().handlers.push(HandlerEntry {
            id,
            validator,
            keep_alive,
            waiters: VecDeque::new(),
            subscribers: Vec::new(),
        });
        debug!(%id, "Handler registered");
        RawHandle::new(id, self.clone())
    }

    /// Number of live handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Route one inbound message to every matching handler.
    ///
    /// A failing custom validator aborts only that handler's match
    /// attempt; the rest of the dispatch pass continues.
    pub fn dispatch(&self, message: Arc<str>) {
        let mut registry = self.inner.lock();
        for entry in registry.handlers.iter_mut() {
            let matched = match entry.validator.check(&message) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(handler = %entry.id, error = %e, "Validator failed, skipping handler");
                    continue;
                }
            };
            if !matched {
                continue;
            }

            // Oldest live waiter gets the message; waiters whose
            // receiver is already gone (timed out) are discarded.
            while let Some(waiter) = entry.waiters.pop_front() {
                if waiter.send(Ok(message.clone())).is_ok() {
                    break;
                }
            }

            // Independently of one-shot delivery, fan out to every
            // subscriber queue; dead subscribers are pruned.
            entry
                .subscribers
                .retain(|tx| tx.send(StreamItem::Message(message.clone())).is_ok());
        }
    }

    /// React to a transport event. Messages are dispatched; link state
    /// changes drive waiter failure and keep-alive replay.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.dispatch(message),
            TransportEvent::Connected => {
                self.inner.lock().link = LinkState::Up;
            }
            TransportEvent::Disconnected { reason } => {
                debug!(%reason, "Link down, starting recovery grace period");
                let generation = {
                    let mut registry = self.inner.lock();
                    registry.generation += 1;
                    registry.link = LinkState::Down {
                        generation: registry.generation,
                    };
                    registry.generation
                };
                let mux = self.clone();
                let grace = self.config.connection_initialization_timeout();
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    mux.expire_if_still_down(generation);
                });
            }
            TransportEvent::Reconnected => {
                self.inner.lock().link = LinkState::Up;
                self.replay_keep_alives().await;
            }
        }
    }

    /// Resend every keep-alive message, in registration order. Restores
    /// server-side push subscriptions that are scoped per physical
    /// connection.
    async fn replay_keep_alives(&self) {
        let keep_alives: Vec<Outgoing> = {
            let registry = self.inner.lock();
            registry
                .handlers
                .iter()
                .filter_map(|entry| entry.keep_alive.clone())
                .collect()
        };
        debug!(count = keep_alives.len(), "Replaying keep-alive messages");
        let pacing = self.config.sleep_interval();
        for message in keep_alives {
            if let Err(e) = self.writer.send(message).await {
                warn!(error = %e, "Failed to replay keep-alive message");
            }
            // Pace the replays so a burst does not trip the server.
            tokio::time::sleep(pacing).await;
        }
    }

    /// Called by the grace timer: if the link watched by `generation`
    /// never recovered, fail every pending waiter and terminate every
    /// subscriber stream. Handler registrations stay; a later reconnect
    /// resumes delivery for new waiters and subscribers.
    fn expire_if_still_down(&self, generation: u64) {
        let mut registry = self.inner.lock();
        let expired = matches!(
            registry.link,
            LinkState::Down { generation: g, .. } if g == generation
        );
        if !expired {
            return;
        }
        warn!("Connection did not recover within the initialization timeout");
        for entry in registry.handlers.iter_mut() {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(Err(WaiterError::ConnectionLost));
            }
            for tx in entry.subscribers.drain(..) {
                let _ = tx.send(StreamItem::Terminated {
                    reason: "connection failed without recovering".to_string(),
                });
            }
        }
    }

    /// Add a one-shot waiter for the handler.
    pub(crate) fn add_waiter(&self, id: Uuid) -> Result<oneshot::Receiver<WaiterResult>, CoreError> {
        let mut registry = self.inner.lock();
        let entry = registry
            .handlers
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(CoreError::HandlerClosed(id))?;
        let (tx, rx) = oneshot::channel();
        entry.waiters.push_back(tx);
        Ok(rx)
    }

    /// Add a persistent subscriber queue to the handler.
    pub(crate) fn add_subscriber(&self, id: Uuid) -> Result<RawStream, CoreError> {
        let mut registry = self.inner.lock();
        let entry = registry
            .handlers
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(CoreError::HandlerClosed(id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.subscribers.push(tx);
        Ok(RawStream::new(rx))
    }

    /// Deregister a handler by id: outstanding waiters fail with a
    /// handler-closed error, subscriber queues are discarded so their
    /// streams end. A no-op for unknown ids.
    pub fn close(&self, id: Uuid) {
        let mut registry = self.inner.lock();
        let Some(position) = registry.handlers.iter().position(|entry| entry.id == id) else {
            return;
        };
        let mut entry = registry.handlers.remove(position);
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Err(WaiterError::Closed(id)));
        }
        debug!(%id, "Handler deregistered");
    }
}
