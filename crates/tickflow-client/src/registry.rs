//! Per-asset subscription registry.
//!
//! Maps (asset, aggregation policy) to a raw handler whose validator
//! matches that asset's push messages, plus a live aggregation state
//! for candle policies. Distinct policies on the same asset coexist
//! without sharing state; `unsubscribe` tears down every policy
//! registered for the asset.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tickflow_candles::{Aggregator, Policy};
use tickflow_core::{Candle, CoreError, CoreResult, Outgoing, Tick, Validator};
use tickflow_router::{Multiplexer, RawHandle, RawStream};
use tickflow_ws::WriteHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::commands::{self, ChangeSymbol};

type SubscriptionKey = (String, Policy);
type ActiveMap = Arc<Mutex<HashMap<SubscriptionKey, Uuid>>>;

/// Removes the registry entry when its stream is dropped.
struct SubscriptionGuard {
    key: SubscriptionKey,
    id: Uuid,
    active: ActiveMap,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        // Only remove the entry if it still belongs to this stream; the
        // asset may have been unsubscribed and re-subscribed since.
        if active.get(&self.key) == Some(&self.id) {
            active.remove(&self.key);
        }
    }
}

/// Registry of live per-asset subscriptions.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    mux: Multiplexer,
    writer: WriteHandle,
    active: ActiveMap,
}

impl SubscriptionRegistry {
    pub fn new(mux: Multiplexer, writer: WriteHandle) -> Self {
        Self {
            mux,
            writer,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live subscriptions across all assets and policies.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Subscribe to an asset's raw tick stream.
    pub async fn subscribe_ticks(&self, asset: &str) -> CoreResult<TickStream> {
        let (handle, stream, guard) = self.open(asset, Policy::Raw).await?;
        Ok(TickStream {
            asset: asset.to_string(),
            _handle: handle,
            stream,
            _guard: guard,
        })
    }

    /// Subscribe to an asset with a candle aggregation policy. Invalid
    /// policy parameters are rejected here, before anything is sent.
    pub async fn subscribe_candles(&self, asset: &str, policy: Policy) -> CoreResult<CandleStream> {
        let aggregator = Aggregator::new(asset, &policy)?;
        let (handle, stream, guard) = self.open(asset, policy).await?;
        Ok(CandleStream {
            asset: asset.to_string(),
            _handle: handle,
            stream,
            aggregator,
            _guard: guard,
        })
    }

    /// Close every subscription registered for the asset, across all
    /// policies, and tell the server to stop pushing it.
    pub async fn unsubscribe(&self, asset: &str) -> CoreResult<()> {
        let ids: Vec<Uuid> = {
            let mut active = self.active.lock();
            let keys: Vec<SubscriptionKey> = active
                .keys()
                .filter(|(subscribed, _)| subscribed == asset)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| active.remove(&key))
                .collect()
        };
        if ids.is_empty() {
            return Ok(());
        }
        for id in &ids {
            self.mux.close(*id);
        }
        debug!(asset, count = ids.len(), "Closed asset subscriptions");
        self.writer.send_text(commands::unsubscribe(asset)).await?;
        Ok(())
    }

    async fn open(
        &self,
        asset: &str,
        policy: Policy,
    ) -> CoreResult<(RawHandle, RawStream, SubscriptionGuard)> {
        let key = (asset.to_string(), policy);
        // The subscribe command doubles as the keep-alive so the
        // server-side push is restored after a reconnect.
        let keep_alive = Outgoing::text(commands::subscribe(asset));
        let validator = Validator::contains(format!("\"{asset}\""));

        let (handle, stream, guard) = {
            let mut active = self.active.lock();
            if active.contains_key(&key) {
                return Err(CoreError::Config(format!(
                    "a subscription for {asset} with policy {:?} already exists",
                    key.1
                )));
            }
            let handle = self.mux.register(validator, Some(keep_alive));
            let stream = handle.subscribe()?;
            active.insert(key.clone(), handle.id());
            let guard = SubscriptionGuard {
                key,
                id: handle.id(),
                active: self.active.clone(),
            };
            (handle, stream, guard)
        };

        handle
            .send_text(ChangeSymbol::new(asset, 1).to_string())
            .await?;
        handle.send_text(commands::unsubscribe(asset)).await?;
        handle.send_text(commands::subscribe(asset)).await?;
        Ok((handle, stream, guard))
    }
}

/// Live stream of raw ticks for one asset.
///
/// Malformed push messages are skipped; the stream ends after
/// `unsubscribe` and surfaces a terminal error if the connection fails
/// without recovering.
pub struct TickStream {
    asset: String,
    _handle: RawHandle,
    stream: RawStream,
    _guard: SubscriptionGuard,
}

impl TickStream {
    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub async fn next(&mut self) -> Option<CoreResult<Tick>> {
        loop {
            match self.stream.next().await? {
                Ok(text) => match crate::parser::parse_tick(&text) {
                    Some(tick) if tick.asset == self.asset => return Some(Ok(tick)),
                    _ => continue,
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = CoreResult<Tick>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }
}

/// Live stream of aggregated candles for one asset.
pub struct CandleStream {
    asset: String,
    _handle: RawHandle,
    stream: RawStream,
    aggregator: Aggregator,
    _guard: SubscriptionGuard,
}

impl CandleStream {
    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub async fn next(&mut self) -> Option<CoreResult<Candle>> {
        loop {
            match self.stream.next().await? {
                Ok(text) => {
                    let Some(tick) =
                        crate::parser::parse_tick(&text).filter(|t| t.asset == self.asset)
                    else {
                        continue;
                    };
                    match self.aggregator.update(&tick) {
                        Ok(Some(candle)) => return Some(Ok(candle)),
                        Ok(None) => continue,
                        Err(e) => {
                            // Per-message failures do not kill the stream.
                            warn!(asset = %self.asset, error = %e, "Skipping unaggregatable tick");
                            continue;
                        }
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = CoreResult<Candle>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }
}
