//! Binance Futures WebSocket wire shapes.
//!
//! Structurally mirrors [`crate::kraken`]: a subscribe/unsubscribe request
//! frame, an `event`-tagged control message, and a feed-tagged data
//! message. Binance has no challenge step — private (user-data) streams
//! authenticate via a `listen_key` obtained out-of-band over REST and
//! appended to the WS URL, so there is no `signed_challenge` analogue.

use serde::{Deserialize, Serialize};

pub const PRIVATE_FEEDS: &[&str] = &["ORDER_TRADE_UPDATE", "ACCOUNT_UPDATE"];

pub fn is_private_feed(feed: &str) -> bool {
    PRIVATE_FEEDS.contains(&feed)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

impl SubscribeRequest {
    pub fn subscribe(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: streams,
            id,
        }
    }

    pub fn unsubscribe(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params: streams,
            id,
        }
    }
}

/// Control-plane responses keyed by request `id`, analogous to Kraken's
/// `event`-tagged messages.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscribeResult {
    pub id: u64,
    pub result: Option<serde_json::Value>,
}

/// Data-plane payloads, tagged by the `e` (event type) field that Binance
/// uses in place of Kraken's `feed`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "e")]
pub enum FeedMessage {
    #[serde(rename = "bookTicker")]
    BookTicker {
        s: String,
        b: String,
        a: String,
    },
    #[serde(rename = "trade")]
    Trade {
        s: String,
        p: String,
        q: String,
    },
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate { o: serde_json::Value },
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate { a: serde_json::Value },
}
