//! The seam between the provider-agnostic session core and each
//! provider's wire format.
//!
//! Kraken tags control messages with `event` and data messages with
//! `feed`; Binance tags control messages by request `id` and data
//! messages with `e`. [`FeedCodec`] normalizes both into one
//! [`IncomingMessage`] shape so [`crate::session`] only has to reason
//! about one demultiplexing path.

use std::fmt;

/// A challenge-response auth ticket attached to private subscribe frames.
/// Binance has no per-message auth step and never constructs one.
#[derive(Debug, Clone)]
pub struct AuthTicket {
    pub api_key: String,
    pub original_challenge: String,
    pub signed_challenge: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Kraken's `challenge` event carries the string to sign.
    Challenge { message: String },
    Subscribed { feed: String, product_ids: Vec<String> },
    Unsubscribed { feed: String, product_ids: Vec<String> },
    Error { message: String },
    Pong,
    /// Informational messages with no bearing on session state (Kraken's
    /// `info` event, Binance's bare `{"result":null,"id":...}` ack).
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Control(ControlEvent),
    Feed { feed: String, payload: serde_json::Value },
    /// Text that didn't parse as either shape. Logged and dropped by the
    /// session core rather than treated as fatal.
    Unrecognized,
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::Challenge { .. } => write!(f, "challenge"),
            ControlEvent::Subscribed { feed, .. } => write!(f, "subscribed({feed})"),
            ControlEvent::Unsubscribed { feed, .. } => write!(f, "unsubscribed({feed})"),
            ControlEvent::Error { message } => write!(f, "error({message})"),
            ControlEvent::Pong => write!(f, "pong"),
            ControlEvent::Info => write!(f, "info"),
        }
    }
}

/// Provider-specific wire encoding/decoding. Implementations are cheap,
/// stateless value types — all mutable session state lives in
/// [`crate::session::Session`].
pub trait FeedCodec: Send + Sync + Clone + 'static {
    /// Whether this provider requires the challenge-response handshake
    /// (spec §4.4 steps 1-4) before subscribing to private feeds.
    const HAS_CHALLENGE: bool;

    fn encode_ping(&self) -> String;

    /// `None` for providers without a challenge step.
    fn encode_challenge_request(&self, api_key: &str) -> Option<String>;

    fn encode_subscribe(&self, feed: &str, products: &[String], auth: Option<&AuthTicket>) -> String;

    fn encode_unsubscribe(&self, feed: &str, products: &[String]) -> String;

    fn decode(&self, raw: &str) -> IncomingMessage;

    fn is_private_feed(&self, feed: &str) -> bool;
}
