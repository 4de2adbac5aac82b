//! Payload extraction from raw feed frames.
//!
//! The routing layer hands subscriptions the raw frame text; this
//! module digs the typed payloads out of it. Push ticks arrive either
//! as a bare `[["SYMBOL",ts,price]]` array (binary frame body) or
//! wrapped in an event frame `42["updateStream",[["SYMBOL",ts,price]]]`.
//! History payloads are a dict with a `"history"` key of
//! `[timestamp, price]` pairs, either at top level or as the second
//! element of an `[event, payload]` array.

use serde_json::Value;
use tickflow_core::Tick;

fn strip_event_prefix(text: &str) -> &str {
    text.strip_prefix("42").unwrap_or(text)
}

/// Extract a tick from a raw frame, if it carries one.
pub fn parse_tick(text: &str) -> Option<Tick> {
    let payload = strip_event_prefix(text);
    if let Ok(tick) = serde_json::from_str::<Tick>(payload) {
        return Some(tick);
    }
    // Event frame: the tick array sits behind the event name.
    let value: Value = serde_json::from_str(payload).ok()?;
    let array = value.as_array()?;
    if array.len() < 2 {
        return None;
    }
    serde_json::from_value(array[1].clone()).ok()
}

/// Extract the `[timestamp, price]` pairs of a history payload, if the
/// frame carries one. Malformed pairs inside an otherwise valid payload
/// are skipped.
pub fn parse_history(text: &str) -> Option<Vec<(f64, f64)>> {
    let payload = strip_event_prefix(text);
    let value: Value = serde_json::from_str(payload).ok()?;
    let history = match &value {
        Value::Array(items) if items.len() > 1 => items[1].get("history")?,
        Value::Object(_) => value.get("history")?,
        _ => return None,
    };
    let pairs = history.as_array()?;
    Some(
        pairs
            .iter()
            .filter_map(|pair| {
                let pair = pair.as_array()?;
                Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
            })
            .collect(),
    )
}
