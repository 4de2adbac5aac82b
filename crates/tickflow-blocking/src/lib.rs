//! Blocking facade over the suspending tickflow client.
//!
//! Every blocking object owns (a share of) one private current-thread
//! scheduler created when the client is built and torn down when the
//! last handle drops; each call drives that scheduler to completion
//! for exactly that call. The facade is not reentrant: concurrent
//! calls from a second thread against the same instance serialize at
//! best and must not be relied upon; use the suspending API in
//! `tickflow-client` or independent instances for concurrency.

use std::sync::Arc;
use std::time::Duration;

use tickflow_client::{CandleStream, Client, ConnectOptions, TickStream};
use tickflow_core::{Candle, Config, CoreError, CoreResult, Outgoing, Tick, Validator};
use tickflow_router::{RawHandle, RawStream};
use tokio::runtime::Runtime;

fn build_runtime() -> CoreResult<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CoreError::Connection(format!("failed to build scheduler: {e}")))
}

/// Blocking feed client.
pub struct BlockingClient {
    inner: Client,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    /// Connect, blocking until a usable session exists or the
    /// initialization timeout passes.
    pub fn connect(config: Config, options: ConnectOptions) -> CoreResult<Self> {
        let runtime = Arc::new(build_runtime()?);
        let inner = runtime.block_on(Client::connect(config, options))?;
        Ok(Self { inner, runtime })
    }

    pub fn config(&self) -> &Arc<Config> {
        self.inner.config()
    }

    pub fn create_handler(
        &self,
        validator: Validator,
        keep_alive: Option<Outgoing>,
    ) -> BlockingRawHandle {
        BlockingRawHandle {
            inner: self.inner.create_handler(validator, keep_alive),
            runtime: self.runtime.clone(),
        }
    }

    pub fn subscribe_symbol(&self, asset: &str) -> CoreResult<BlockingTickStream> {
        let inner = self.runtime.block_on(self.inner.subscribe_symbol(asset))?;
        Ok(BlockingTickStream {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn subscribe_symbol_chunked(
        &self,
        asset: &str,
        size: usize,
    ) -> CoreResult<BlockingCandleStream> {
        let inner = self
            .runtime
            .block_on(self.inner.subscribe_symbol_chunked(asset, size))?;
        Ok(BlockingCandleStream {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn subscribe_symbol_timed(
        &self,
        asset: &str,
        duration: Duration,
    ) -> CoreResult<BlockingCandleStream> {
        let inner = self
            .runtime
            .block_on(self.inner.subscribe_symbol_timed(asset, duration))?;
        Ok(BlockingCandleStream {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn subscribe_symbol_time_aligned(
        &self,
        asset: &str,
        duration: Duration,
    ) -> CoreResult<BlockingCandleStream> {
        let inner = self
            .runtime
            .block_on(self.inner.subscribe_symbol_time_aligned(asset, duration))?;
        Ok(BlockingCandleStream {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn unsubscribe(&self, asset: &str) -> CoreResult<()> {
        self.runtime.block_on(self.inner.unsubscribe(asset))
    }

    pub fn get_candles(&self, asset: &str, period: i64, offset: i64) -> CoreResult<Vec<Candle>> {
        self.runtime
            .block_on(self.inner.get_candles(asset, period, offset))
    }

    pub fn server_time(&self) -> i64 {
        self.inner.server_time()
    }

    pub fn is_demo(&self) -> bool {
        self.inner.is_demo()
    }

    pub fn reconnect(&self) {
        self.inner.reconnect();
    }

    pub fn disconnect(&self) {
        self.inner.disconnect();
    }
}

/// Blocking counterpart of [`tickflow_router::RawHandle`].
pub struct BlockingRawHandle {
    inner: RawHandle,
    runtime: Arc<Runtime>,
}

impl BlockingRawHandle {
    pub fn id(&self) -> uuid::Uuid {
        self.inner.id()
    }

    pub fn send_text(&self, text: impl Into<String>) -> CoreResult<()> {
        self.runtime.block_on(self.inner.send_text(text))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.runtime.block_on(self.inner.send_binary(data))
    }

    pub fn send_and_wait(&self, message: Outgoing) -> CoreResult<String> {
        self.runtime.block_on(self.inner.send_and_wait(message))
    }

    pub fn wait_next(&self) -> CoreResult<String> {
        self.runtime.block_on(self.inner.wait_next())
    }

    pub fn subscribe(&self) -> CoreResult<BlockingRawStream> {
        Ok(BlockingRawStream {
            inner: self.inner.subscribe()?,
            runtime: self.runtime.clone(),
        })
    }

    pub fn close(self) {
        self.inner.close();
    }
}

/// Blocking message stream for a raw handler.
pub struct BlockingRawStream {
    inner: RawStream,
    runtime: Arc<Runtime>,
}

impl BlockingRawStream {
    pub fn next(&mut self) -> Option<CoreResult<String>> {
        self.runtime.block_on(self.inner.next())
    }
}

impl Iterator for BlockingRawStream {
    type Item = CoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        BlockingRawStream::next(self)
    }
}

/// Blocking tick stream for one asset.
pub struct BlockingTickStream {
    inner: TickStream,
    runtime: Arc<Runtime>,
}

impl BlockingTickStream {
    pub fn asset(&self) -> &str {
        self.inner.asset()
    }

    pub fn next(&mut self) -> Option<CoreResult<Tick>> {
        self.runtime.block_on(self.inner.next())
    }
}

impl Iterator for BlockingTickStream {
    type Item = CoreResult<Tick>;

    fn next(&mut self) -> Option<Self::Item> {
        BlockingTickStream::next(self)
    }
}

/// Blocking candle stream for one asset.
pub struct BlockingCandleStream {
    inner: CandleStream,
    runtime: Arc<Runtime>,
}

impl BlockingCandleStream {
    pub fn asset(&self) -> &str {
        self.inner.asset()
    }

    pub fn next(&mut self) -> Option<CoreResult<Candle>> {
        self.runtime.block_on(self.inner.next())
    }
}

impl Iterator for BlockingCandleStream {
    type Item = CoreResult<Candle>;

    fn next(&mut self) -> Option<Self::Item> {
        BlockingCandleStream::next(self)
    }
}
