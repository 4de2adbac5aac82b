//! Suspending client facade and subscription registry for the tickflow
//! feed.
//!
//! The [`Client`] owns one physical connection and exposes:
//! - raw handlers (`create_handler`) for request/response and filtered
//!   push access
//! - per-asset tick and candle subscriptions
//! - bounded one-shot history retrieval (`get_candles`)
//!
//! For a blocking surface over the same operations see the
//! `tickflow-blocking` crate.

pub mod client;
pub mod commands;
pub mod history;
pub mod parser;
pub mod registry;

pub use client::{Client, ConnectOptions};
pub use history::{get_candles, HISTORY_WAIT};
pub use registry::{CandleStream, SubscriptionRegistry, TickStream};

// The aggregation policy is part of the subscription surface.
pub use tickflow_candles::Policy;
