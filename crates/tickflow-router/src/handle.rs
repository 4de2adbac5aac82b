//! Caller-facing handle and stream types for raw handlers.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tickflow_core::{CoreError, CoreResult, Outgoing};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::multiplexer::{Multiplexer, StreamItem, WaiterResult};

/// Handle to a registered handler.
///
/// The handler lives in the multiplexer's registry; this handle proxies
/// operations by id. Dropping the handle deregisters the handler, as
/// does an explicit [`RawHandle::close`].
pub struct RawHandle {
    id: Uuid,
    mux: Multiplexer,
    closed: bool,
}

impl RawHandle {
    pub(crate) fn new(id: Uuid, mux: Multiplexer) -> Self {
        Self {
            id,
            mux,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fire-and-forget text send through the shared connection.
    pub async fn send_text(&self, text: impl Into<String>) -> CoreResult<()> {
        self.mux.writer().send_text(text).await?;
        Ok(())
    }

    /// Fire-and-forget binary send through the shared connection.
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.mux.writer().send_binary(data).await?;
        Ok(())
    }

    /// Send a message, then suspend until the next message matching
    /// this handler's validator arrives. Bounded by the configured
    /// request timeout.
    pub async fn send_and_wait(&self, message: Outgoing) -> CoreResult<String> {
        let deadline = self.mux.config().timeout();
        self.send_and_wait_with_timeout(message, deadline).await
    }

    /// [`RawHandle::send_and_wait`] with an explicit deadline.
    pub async fn send_and_wait_with_timeout(
        &self,
        message: Outgoing,
        deadline: Duration,
    ) -> CoreResult<String> {
        // Register the waiter before sending so a fast response cannot
        // slip past between send and wait.
        let rx = self.mux.add_waiter(self.id)?;
        self.mux.writer().send(message).await?;
        self.await_match(rx, deadline).await
    }

    /// Suspend until the next matching message, without sending.
    pub async fn wait_next(&self) -> CoreResult<String> {
        let deadline = self.mux.config().timeout();
        self.wait_next_with_timeout(deadline).await
    }

    /// [`RawHandle::wait_next`] with an explicit deadline.
    pub async fn wait_next_with_timeout(&self, deadline: Duration) -> CoreResult<String> {
        let rx = self.mux.add_waiter(self.id)?;
        self.await_match(rx, deadline).await
    }

    /// Open a persistent subscription to every message matching this
    /// handler's validator, in arrival order.
    ///
    /// The stream is unbounded and consumer-paced: a slow reader never
    /// blocks dispatch or other subscribers, it only grows its own
    /// queue. The stream ends when the handler is closed and yields a
    /// terminal error if the connection fails without recovering.
    pub fn subscribe(&self) -> CoreResult<RawStream> {
        self.mux.add_subscriber(self.id)
    }

    /// Deregister the handler. Outstanding waiters observe a
    /// handler-closed error; subscriber streams end.
    pub fn close(mut self) {
        self.mux.close(self.id);
        self.closed = true;
    }

    async fn await_match(
        &self,
        rx: oneshot::Receiver<WaiterResult>,
        deadline: Duration,
    ) -> CoreResult<String> {
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => Err(CoreError::Timeout(format!(
                "no matching message within {deadline:?}"
            ))),
            Ok(Err(_)) => Err(CoreError::HandlerClosed(self.id)),
            Ok(Ok(Ok(message))) => Ok(message.to_string()),
            Ok(Ok(Err(e))) => Err(e.into()),
        }
    }
}

impl Drop for RawHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.mux.close(self.id);
        }
    }
}

/// Lazy, infinite sequence of matching messages for one subscriber.
///
/// Restartable only by creating a new subscription.
pub struct RawStream {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    terminated: bool,
}

impl RawStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamItem>) -> Self {
        Self {
            rx,
            terminated: false,
        }
    }

    /// Next message in arrival order. `None` once the handler is
    /// closed; a connection that failed without recovering yields one
    /// terminal `Err` and then `None`.
    pub async fn next(&mut self) -> Option<CoreResult<String>> {
        if self.terminated {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamItem::Message(message)) => Some(Ok(message.to_string())),
            Some(StreamItem::Terminated { reason }) => {
                self.terminated = true;
                Some(Err(CoreError::Connection(reason)))
            }
            None => None,
        }
    }
}

impl futures_util::Stream for RawStream {
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(StreamItem::Message(message))) => {
                Poll::Ready(Some(Ok(message.to_string())))
            }
            Poll::Ready(Some(StreamItem::Terminated { reason })) => {
                self.terminated = true;
                Poll::Ready(Some(Err(CoreError::Connection(reason))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::RwLock;
    use tickflow_core::{Config, Validator};
    use tickflow_ws::{ConnectionState, WriteHandle};

    fn test_mux() -> (Multiplexer, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(64);
        let writer = WriteHandle::new(tx, Arc::new(RwLock::new(ConnectionState::Connected)));
        (Multiplexer::new(writer, Arc::new(Config::new())), rx)
    }

    #[tokio::test]
    async fn send_and_wait_resolves_on_match() {
        let (mux, mut outbound) = test_mux();
        let handle = mux.register(Validator::contains("balance"), None);

        let dispatcher = mux.clone();
        let task = tokio::spawn(async move {
            handle
                .send_and_wait(Outgoing::text("42[\"getBalance\"]"))
                .await
        });

        // The send must hit the wire before the response arrives.
        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent, Outgoing::text("42[\"getBalance\"]"));

        dispatcher.dispatch(Arc::from(r#"42["balance",{"value":123.45}]"#));
        let response = task.await.unwrap().unwrap();
        assert!(response.contains("123.45"));
    }

    #[tokio::test]
    async fn wait_next_times_out() {
        let (mux, _outbound) = test_mux();
        let handle = mux.register(Validator::contains("never"), None);

        let result = handle
            .wait_next_with_timeout(Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn waiters_resolve_in_fifo_order() {
        let (mux, _outbound) = test_mux();
        let handle = Arc::new(mux.register(Validator::starts_with("42"), None));

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_next().await })
        };
        // Make sure the first waiter is queued before the second.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        mux.dispatch(Arc::from("42[\"first\"]"));
        mux.dispatch(Arc::from("42[\"second\"]"));

        assert_eq!(first.await.unwrap().unwrap(), "42[\"first\"]");
        assert_eq!(second.await.unwrap().unwrap(), "42[\"second\"]");
    }

    #[tokio::test]
    async fn one_shot_and_subscribers_are_independent_sinks() {
        let (mux, _outbound) = test_mux();
        let handle = Arc::new(mux.register(Validator::contains("tick"), None));
        let mut stream = handle.subscribe().unwrap();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        mux.dispatch(Arc::from("tick-1"));

        // Both the waiter and the subscriber observe the same message.
        assert_eq!(waiter.await.unwrap().unwrap(), "tick-1");
        assert_eq!(stream.next().await.unwrap().unwrap(), "tick-1");
    }

    #[tokio::test]
    async fn close_fails_pending_waiters_and_ends_streams() {
        let (mux, _outbound) = test_mux();
        let handle = mux.register(Validator::None, None);
        let id = handle.id();
        let mut stream = handle.subscribe().unwrap();

        let waiter_rx = mux.add_waiter(id).unwrap();
        handle.close();

        let failed = waiter_rx.await.unwrap();
        assert!(matches!(failed, Err(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(mux.handler_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_deregisters() {
        let (mux, _outbound) = test_mux();
        let handle = mux.register(Validator::None, None);
        assert_eq!(mux.handler_count(), 1);
        drop(handle);
        assert_eq!(mux.handler_count(), 0);
    }

    #[tokio::test]
    async fn operations_on_closed_handler_fail() {
        let (mux, _outbound) = test_mux();
        let handle = mux.register(Validator::None, None);
        let id = handle.id();
        mux.close(id);

        let result = handle.wait_next().await;
        assert!(matches!(result, Err(CoreError::HandlerClosed(got)) if got == id));
        assert!(handle.subscribe().is_err());
        // Avoid double-close noise from Drop.
        handle.close();
    }
}
