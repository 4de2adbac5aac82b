//! Domain types: outbound payloads, ticks, candles, server time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, CoreResult};

/// Outbound message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Binary(Vec<u8>),
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Outgoing::Text(text.into())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Outgoing::Binary(data.into())
    }
}

/// One raw price update for an asset.
///
/// Wire shape: `[["SYMBOL",timestamp,price]]`, a one-element array
/// wrapping a `[symbol, timestamp, price]` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub asset: String,
    /// Unix timestamp from the server, fractional seconds preserved.
    pub timestamp: f64,
    pub price: f64,
}

impl Tick {
    pub fn new(asset: impl Into<String>, timestamp: f64, price: f64) -> Self {
        Self {
            asset: asset.into(),
            timestamp,
            price,
        }
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp as i64, 0).unwrap_or_else(Utc::now)
    }
}

impl<'de> Deserialize<'de> for Tick {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let outer: Vec<Vec<serde_json::Value>> = Vec::deserialize(deserializer)?;
        let [inner] = outer.as_slice() else {
            return Err(serde::de::Error::custom("expected a one-element array"));
        };
        let [asset, timestamp, price] = inner.as_slice() else {
            return Err(serde::de::Error::custom(
                "expected a [symbol, timestamp, price] triple",
            ));
        };
        Ok(Tick {
            asset: asset
                .as_str()
                .ok_or_else(|| serde::de::Error::custom("symbol must be a string"))?
                .to_string(),
            timestamp: timestamp
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom("timestamp must be a number"))?,
            price: price
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom("price must be a number"))?,
        })
    }
}

/// Bucket key for fixed-period aggregation: `floor(ts / period) * period`.
pub fn bucket_start(timestamp: f64, period: i64) -> i64 {
    ((timestamp / period as f64).floor() as i64) * period
}

fn to_decimal(price: f64) -> CoreResult<Decimal> {
    Decimal::from_f64(price)
        .ok_or_else(|| CoreError::Protocol(format!("price {price} is not representable")))
}

/// OHLC summary of the ticks in one bucket or window.
///
/// Invariants: `low <= open, close <= high`; `tick_count >= 1`. For
/// fixed-period buckets `bucket_start` is a multiple of the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub asset: String,
    /// Start of the bucket/window, integer Unix seconds.
    pub bucket_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_count: u32,
}

impl Candle {
    /// Open a candle from the first tick absorbed into a bucket.
    pub fn open_at(asset: impl Into<String>, bucket_start: i64, price: f64) -> CoreResult<Self> {
        let price = to_decimal(price)?;
        Ok(Self {
            asset: asset.into(),
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            tick_count: 1,
        })
    }

    /// Fold one more tick into the candle: running high/low, latest
    /// close, count incremented. Open never changes.
    pub fn absorb(&mut self, price: f64) -> CoreResult<()> {
        let price = to_decimal(price)?;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.tick_count += 1;
        Ok(())
    }

    pub fn price_range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.bucket_start, 0).unwrap_or_else(Utc::now)
    }
}

/// Server clock tracking.
///
/// Keeps the last server timestamp seen on the feed together with the
/// local receive instant, so local time can be mapped onto the server's
/// clock without a dedicated time-sync exchange.
#[derive(Debug, Clone)]
pub struct ServerTime {
    last_server_time: f64,
    last_updated: DateTime<Utc>,
    offset: ChronoDuration,
}

impl Default for ServerTime {
    fn default() -> Self {
        Self {
            last_server_time: 0.0,
            last_updated: Utc::now(),
            offset: ChronoDuration::zero(),
        }
    }
}

impl ServerTime {
    /// Record a fresh server timestamp and recompute the local offset.
    pub fn update(&mut self, server_timestamp: f64) {
        let now = Utc::now();
        self.last_server_time = server_timestamp;
        self.last_updated = now;
        let offset_ms = (server_timestamp - now.timestamp() as f64) * 1000.0;
        self.offset = ChronoDuration::milliseconds(offset_ms as i64);
    }

    /// Estimated current server time as a Unix timestamp.
    pub fn now(&self) -> i64 {
        (Utc::now() + self.offset).timestamp()
    }

    pub fn last_server_time(&self) -> f64 {
        self.last_server_time
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_tick_wire_shape() {
        let tick: Tick = serde_json::from_str(r#"[["EURUSD_otc",1700000000.123,1.0625]]"#).unwrap();
        assert_eq!(tick.asset, "EURUSD_otc");
        assert_eq!(tick.timestamp, 1700000000.123);
        assert_eq!(tick.price, 1.0625);
    }

    #[test]
    fn parse_tick_rejects_wrong_arity() {
        assert!(serde_json::from_str::<Tick>(r#"[["EURUSD_otc",1.0]]"#).is_err());
        assert!(serde_json::from_str::<Tick>(r#"[]"#).is_err());
        assert!(serde_json::from_str::<Tick>(r#"[["A",1,2],["B",3,4]]"#).is_err());
    }

    #[test]
    fn bucket_start_floors_to_period_multiple() {
        assert_eq!(bucket_start(100.0, 60), 60);
        assert_eq!(bucket_start(119.9, 60), 60);
        assert_eq!(bucket_start(120.0, 60), 120);
        assert_eq!(bucket_start(160.0, 60), 120);
    }

    #[test]
    fn candle_absorb_maintains_invariants() {
        let mut candle = Candle::open_at("EURUSD_otc", 60, 1.0).unwrap();
        candle.absorb(1.2).unwrap();
        candle.absorb(0.9).unwrap();
        assert_eq!(candle.open, dec!(1.0));
        assert_eq!(candle.high, dec!(1.2));
        assert_eq!(candle.low, dec!(0.9));
        assert_eq!(candle.close, dec!(0.9));
        assert_eq!(candle.tick_count, 3);
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
    }

    #[test]
    fn non_finite_price_is_a_protocol_error() {
        assert!(matches!(
            Candle::open_at("X", 0, f64::NAN),
            Err(CoreError::Protocol(_))
        ));
        let mut candle = Candle::open_at("X", 0, 1.0).unwrap();
        assert!(candle.absorb(f64::INFINITY).is_err());
    }

    #[test]
    fn server_time_offset_tracks_forward_clock() {
        let mut st = ServerTime::default();
        let ahead = Utc::now().timestamp() as f64 + 120.0;
        st.update(ahead);
        let estimated = st.now();
        assert!((estimated - (ahead as i64)).abs() <= 2);
    }
}
