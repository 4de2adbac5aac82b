//! Message multiplexer and raw handlers for the tickflow feed client.
//!
//! One physical inbound stream fans out to many logical consumers:
//! - one-shot waiters ("send and await match", "await next match")
//! - persistent per-consumer subscription queues
//!
//! Handlers are classified by [`tickflow_core::Validator`] predicates.
//! Per handler, delivery order equals transport delivery order; there
//! is no cross-handler ordering guarantee.

pub mod handle;
pub mod multiplexer;

pub use handle::{RawHandle, RawStream};
pub use multiplexer::Multiplexer;
