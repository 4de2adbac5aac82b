//! One-shot historical candle retrieval.
//!
//! Built from the same routing primitives as subscriptions, but
//! bounded: a temporary handler intercepts the history push triggered
//! by `changeSymbol`, the returned `[timestamp, price]` pairs are run
//! through fixed-period aggregation, and the handler is discarded.
//! Hitting the wait ceiling yields an empty result, not an error.

use std::time::Duration;

use tickflow_candles::aggregate_fixed_period;
use tickflow_core::{Candle, CoreError, CoreResult, Validator};
use tickflow_router::Multiplexer;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::commands::ChangeSymbol;

/// Fixed ceiling for the history response wait.
pub const HISTORY_WAIT: Duration = Duration::from_secs(10);

/// Retrieve historical candles for an asset.
///
/// `period` is the candle width in seconds. `offset` is accepted for
/// interface compatibility but ignored: the server decides the history
/// depth pushed for `changeSymbol`.
pub async fn get_candles(
    mux: &Multiplexer,
    asset: &str,
    period: i64,
    _offset: i64,
) -> CoreResult<Vec<Candle>> {
    if period <= 0 {
        return Err(CoreError::Config(format!(
            "candle period must be positive, got {period}"
        )));
    }

    let handle = mux.register(Validator::contains("history"), None);
    let mut stream = handle.subscribe()?;
    handle
        .send_text(ChangeSymbol::new(asset, period).to_string())
        .await?;

    // Fixed ceiling plus the configured grace period for time-bounded
    // result waits.
    let deadline = Instant::now() + HISTORY_WAIT + mux.config().extra_duration();
    let pairs = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(asset, "History wait ceiling reached");
            break None;
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Err(_) => {
                debug!(asset, "History wait ceiling reached");
                break None;
            }
            Ok(None) => break None,
            Ok(Some(Err(e))) => {
                // The documented exception: this path degrades to an
                // empty result instead of surfacing the error.
                warn!(asset, error = %e, "History wait aborted");
                break None;
            }
            Ok(Some(Ok(text))) => {
                if let Some(pairs) = crate::parser::parse_history(&text) {
                    break Some(pairs);
                }
                // Matched "history" but carried no payload; keep waiting.
            }
        }
    };

    handle.close();

    match pairs {
        Some(pairs) => aggregate_fixed_period(asset, pairs, period),
        None => Ok(Vec::new()),
    }
}
