//! Fixed-period bucketing over a finite tick batch.
//!
//! Used by one-shot history retrieval: the server returns an array of
//! `[timestamp, price]` pairs which is folded into tumbling buckets of
//! the requested period.

use std::collections::BTreeMap;

use tickflow_core::{bucket_start, Candle, CoreError, CoreResult};

/// Aggregate a finite batch of `(timestamp, price)` pairs into
/// fixed-period candles.
///
/// Bucket key is `floor(timestamp / period) * period`. A bucket's open
/// is the price of the first pair processed into it and its close the
/// last, in intake order; pairs are not re-sorted by timestamp. All
/// buckets are emitted once the batch is exhausted, sorted ascending by
/// bucket key.
pub fn aggregate_fixed_period(
    asset: &str,
    pairs: impl IntoIterator<Item = (f64, f64)>,
    period: i64,
) -> CoreResult<Vec<Candle>> {
    if period <= 0 {
        return Err(CoreError::Config(format!(
            "candle period must be positive, got {period}"
        )));
    }

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for (timestamp, price) in pairs {
        let key = bucket_start(timestamp, period);
        match buckets.get_mut(&key) {
            Some(candle) => candle.absorb(price)?,
            None => {
                buckets.insert(key, Candle::open_at(asset, key, price)?);
            }
        }
    }
    Ok(buckets.into_values().collect())
}
