//! Outbound command frames understood by the feed.

use std::fmt;

use serde::Serialize;

/// `changeSymbol` command: selects the asset/period the server streams
/// and pushes a history snapshot for it.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSymbol {
    pub asset: String,
    pub period: i64,
}

impl ChangeSymbol {
    pub fn new(asset: impl Into<String>, period: i64) -> Self {
        Self {
            asset: asset.into(),
            period,
        }
    }
}

impl fmt::Display for ChangeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "42[\"changeSymbol\",{}]",
            serde_json::to_string(self).map_err(|_| fmt::Error)?
        )
    }
}

/// `subfor` command: subscribe to an asset's push stream.
pub fn subscribe(asset: &str) -> String {
    format!("42[\"subfor\",\"{asset}\"]")
}

/// `unsubfor` command: drop an asset's push stream.
pub fn unsubscribe(asset: &str) -> String {
    format!("42[\"unsubfor\",\"{asset}\"]")
}
