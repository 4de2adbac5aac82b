//! Frame classification for the socket.io-style feed protocol.
//!
//! The feed speaks engine.io/socket.io framing over the WebSocket:
//! - `0{"sid":...}`: transport open, client answers with `40`
//! - `2`: ping, client answers with `3`
//! - `40{"sid":...}`: namespace acknowledged, connection is usable
//! - `42["<event_name>", <json_payload>]`: event frame
//! - `451-["<event_name>", ...]`: preamble for a binary frame that
//!   carries the actual JSON payload
//!
//! Only the control frames are consumed by the connection manager;
//! event frames and binary payloads are forwarded downstream untouched.

/// Outbound frame opening the default namespace.
pub const NAMESPACE_OPEN: &str = "40";

/// Outbound answer to a ping.
pub const PONG: &str = "3";

/// Classified inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `0{...}` transport open.
    Open(&'a str),
    /// `2` ping.
    Ping,
    /// `3` pong.
    Pong,
    /// `40...` namespace acknowledged.
    NamespaceAck(&'a str),
    /// `42[...]` event frame, payload is everything after the `42`.
    Event(&'a str),
    /// `451-[...]` binary preamble, payload is everything after `451-`.
    BinaryPreamble(&'a str),
    /// Anything else; forwarded as-is.
    Other(&'a str),
}

/// Classify an inbound text frame.
pub fn classify(text: &str) -> Frame<'_> {
    if text == "2" {
        Frame::Ping
    } else if text == "3" {
        Frame::Pong
    } else if let Some(rest) = text.strip_prefix("451-") {
        Frame::BinaryPreamble(rest)
    } else if let Some(rest) = text.strip_prefix("42") {
        Frame::Event(rest)
    } else if let Some(rest) = text.strip_prefix("40") {
        Frame::NamespaceAck(rest)
    } else if let Some(rest) = text.strip_prefix('0') {
        Frame::Open(rest)
    } else {
        Frame::Other(text)
    }
}
