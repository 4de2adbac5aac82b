//! Continuous aggregation states for live subscriptions.
//!
//! Each state consumes ticks one at a time and emits at most one candle
//! per tick. States are pure with respect to the clock: windows open
//! and close on tick timestamps, never on a timer.

use std::time::Duration;

use tickflow_core::{bucket_start, Candle, CoreError, CoreResult, Tick};
use tracing::debug;

/// Aggregation policy for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Policy {
    /// No aggregation: the subscription yields raw ticks.
    Raw,
    /// One candle per exactly `n` ticks.
    Chunked(usize),
    /// One candle per elapsed interval, windows opened by the first
    /// tick after the previous window closed.
    Timed(Duration),
    /// One candle per interval, window boundaries aligned to multiples
    /// of the interval.
    TimeAligned(Duration),
}

fn require_positive(duration: Duration) -> CoreResult<()> {
    if duration.is_zero() {
        return Err(CoreError::Config(
            "aggregation duration must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Fixed-period bucketing over a live tick stream.
///
/// A bucket closes as soon as a tick with a strictly greater bucket key
/// arrives. Ticks whose bucket key lies behind the open bucket are
/// dropped; there is no retroactive correction of emitted candles.
#[derive(Debug)]
pub struct FixedPeriodState {
    asset: String,
    period: i64,
    current: Option<Candle>,
}

impl FixedPeriodState {
    pub fn new(asset: impl Into<String>, period: i64) -> CoreResult<Self> {
        if period <= 0 {
            return Err(CoreError::Config(format!(
                "candle period must be positive, got {period}"
            )));
        }
        Ok(Self {
            asset: asset.into(),
            period,
            current: None,
        })
    }

    pub fn update(&mut self, tick: &Tick) -> CoreResult<Option<Candle>> {
        let key = bucket_start(tick.timestamp, self.period);
        match self.current.as_mut() {
            None => {
                self.current = Some(Candle::open_at(&self.asset, key, tick.price)?);
                Ok(None)
            }
            Some(candle) if key == candle.bucket_start => {
                candle.absorb(tick.price)?;
                Ok(None)
            }
            Some(candle) if key > candle.bucket_start => {
                let finished = std::mem::replace(
                    candle,
                    Candle::open_at(&self.asset, key, tick.price)?,
                );
                Ok(Some(finished))
            }
            Some(candle) => {
                debug!(
                    asset = %self.asset,
                    late_bucket = key,
                    open_bucket = candle.bucket_start,
                    "Dropping late tick for past bucket"
                );
                Ok(None)
            }
        }
    }
}

/// Chunked aggregation: exactly `n` ticks per candle, elapsed time is
/// irrelevant.
#[derive(Debug)]
pub struct ChunkState {
    asset: String,
    size: usize,
    current: Option<Candle>,
}

impl ChunkState {
    pub fn new(asset: impl Into<String>, size: usize) -> CoreResult<Self> {
        if size == 0 {
            return Err(CoreError::Config(
                "chunk size must be at least one tick".to_string(),
            ));
        }
        Ok(Self {
            asset: asset.into(),
            size,
            current: None,
        })
    }

    pub fn update(&mut self, tick: &Tick) -> CoreResult<Option<Candle>> {
        match self.current.as_mut() {
            Some(candle) => candle.absorb(tick.price)?,
            None => {
                self.current = Some(Candle::open_at(
                    &self.asset,
                    tick.timestamp as i64,
                    tick.price,
                )?);
            }
        }
        let full = self
            .current
            .as_ref()
            .is_some_and(|candle| candle.tick_count as usize >= self.size);
        Ok(if full { self.current.take() } else { None })
    }
}

/// Timed windows: the first tick opens a window, the first tick at or
/// past `window start + duration` closes it (and is included in it).
/// The next tick after that opens the next window.
#[derive(Debug)]
pub struct TimedState {
    asset: String,
    duration: Duration,
    window_start: Option<f64>,
    current: Option<Candle>,
}

impl TimedState {
    pub fn new(asset: impl Into<String>, duration: Duration) -> CoreResult<Self> {
        require_positive(duration)?;
        Ok(Self {
            asset: asset.into(),
            duration,
            window_start: None,
            current: None,
        })
    }

    pub fn update(&mut self, tick: &Tick) -> CoreResult<Option<Candle>> {
        let Some(start) = self.window_start else {
            self.window_start = Some(tick.timestamp);
            self.current = Some(Candle::open_at(
                &self.asset,
                tick.timestamp as i64,
                tick.price,
            )?);
            return Ok(None);
        };

        if let Some(candle) = self.current.as_mut() {
            candle.absorb(tick.price)?;
        }

        if tick.timestamp - start >= self.duration.as_secs_f64() {
            self.window_start = None;
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }
}

/// Time-aligned windows: boundaries sit on multiples of the duration.
/// A tick at or past the boundary emits the previous window, stamped at
/// that window's aligned start, and opens the next one.
#[derive(Debug)]
pub struct TimeAlignedState {
    asset: String,
    duration: Duration,
    current: Option<Candle>,
    next_boundary: Option<f64>,
}

impl TimeAlignedState {
    pub fn new(asset: impl Into<String>, duration: Duration) -> CoreResult<Self> {
        require_positive(duration)?;
        // Windows must tile the day so that boundaries are stable
        // across sessions.
        if 24 * 60 * 60 % duration.as_secs().max(1) != 0 || duration.subsec_nanos() != 0 {
            return Err(CoreError::Config(format!(
                "time-aligned duration must divide a day, got {duration:?}"
            )));
        }
        Ok(Self {
            asset: asset.into(),
            duration,
            current: None,
            next_boundary: None,
        })
    }

    fn aligned_start(&self, timestamp: f64) -> i64 {
        bucket_start(timestamp, self.duration.as_secs() as i64)
    }

    pub fn update(&mut self, tick: &Tick) -> CoreResult<Option<Candle>> {
        let Some(boundary) = self.next_boundary else {
            let start = self.aligned_start(tick.timestamp);
            self.current = Some(Candle::open_at(&self.asset, start, tick.price)?);
            self.next_boundary = Some((start + self.duration.as_secs() as i64) as f64);
            return Ok(None);
        };

        if tick.timestamp < boundary {
            if let Some(candle) = self.current.as_mut() {
                candle.absorb(tick.price)?;
            }
            return Ok(None);
        }

        // The window is complete; this tick belongs to a new one.
        let start = self.aligned_start(tick.timestamp);
        let finished = std::mem::replace(
            &mut self.current,
            Some(Candle::open_at(&self.asset, start, tick.price)?),
        );
        self.next_boundary = Some((start + self.duration.as_secs() as i64) as f64);
        Ok(finished)
    }
}

/// One live aggregation state, selected by [`Policy`].
#[derive(Debug)]
pub enum Aggregator {
    /// Passthrough: one single-tick candle per tick.
    Raw { asset: String },
    Chunked(ChunkState),
    Timed(TimedState),
    TimeAligned(TimeAlignedState),
}

impl Aggregator {
    /// Build the aggregation state for a policy. Invalid parameters
    /// (zero chunk size, zero duration) are rejected here, at
    /// subscription time.
    pub fn new(asset: impl Into<String>, policy: &Policy) -> CoreResult<Self> {
        let asset = asset.into();
        Ok(match policy {
            Policy::Raw => Aggregator::Raw { asset },
            Policy::Chunked(size) => Aggregator::Chunked(ChunkState::new(asset, *size)?),
            Policy::Timed(duration) => Aggregator::Timed(TimedState::new(asset, *duration)?),
            Policy::TimeAligned(duration) => {
                Aggregator::TimeAligned(TimeAlignedState::new(asset, *duration)?)
            }
        })
    }

    /// Feed one tick; returns the finished candle when a bucket/window
    /// closed.
    pub fn update(&mut self, tick: &Tick) -> CoreResult<Option<Candle>> {
        match self {
            Aggregator::Raw { asset } => Ok(Some(Candle::open_at(
                asset.as_str(),
                tick.timestamp as i64,
                tick.price,
            )?)),
            Aggregator::Chunked(state) => state.update(tick),
            Aggregator::Timed(state) => state.update(tick),
            Aggregator::TimeAligned(state) => state.update(tick),
        }
    }
}
