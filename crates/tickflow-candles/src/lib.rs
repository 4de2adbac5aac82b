//! Tick-to-candle aggregation for the tickflow feed client.
//!
//! Pure transformation from tick sequences to OHLC candle sequences:
//! - [`batch::aggregate_fixed_period`] for finite history batches
//! - [`stream`] states for live subscriptions (fixed-period, chunked,
//!   timed, time-aligned)
//!
//! Nothing here touches the network or the clock; windows open and
//! close on tick timestamps only.

pub mod batch;
pub mod stream;

pub use batch::aggregate_fixed_period;
pub use stream::{
    Aggregator, ChunkState, FixedPeriodState, Policy, TimeAlignedState, TimedState,
};
