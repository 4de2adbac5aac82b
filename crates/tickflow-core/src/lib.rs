//! Core domain types for the tickflow feed client.
//!
//! This crate provides the pieces shared by every other tickflow crate:
//! - `Validator`: composable predicates over inbound message text
//! - `Config`: client configuration with an irreversible use-lock
//! - `Tick`, `Candle`: raw price updates and OHLC aggregates
//! - `CoreError`: the error taxonomy

pub mod config;
pub mod error;
pub mod types;
pub mod validator;

pub use config::{Config, ConfigSnapshot};
pub use error::{CoreError, CoreResult};
pub use types::{bucket_start, Candle, Outgoing, ServerTime, Tick};
pub use validator::{CustomPredicate, Validator};
