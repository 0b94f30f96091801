//! Kraken Futures WebSocket and REST wire shapes.
//!
//! See <https://support.kraken.com/hc/en-us/articles/360022839771-Trade>
//! for the public feed shapes this module models.

use serde::{Deserialize, Serialize};

pub const REST_PATH_PREFIX: &str = "/derivatives/api/v3";

/// Feeds that require challenge-response authentication before subscribing.
pub const PRIVATE_FEEDS: &[&str] = &["fills", "open_orders", "open_positions", "balances"];

pub fn is_private_feed(feed: &str) -> bool {
    PRIVATE_FEEDS.contains(&feed)
}

/// A `subscribe`/`unsubscribe` request frame. Private feeds additionally
/// carry `api_key`, `original_challenge`, and `signed_challenge` (spec
/// §4.4 step 4).
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub event: &'static str,
    pub feed: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub product_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_challenge: Option<String>,
}

impl SubscribeRequest {
    pub fn subscribe(feed: impl Into<String>, product_ids: Vec<String>) -> Self {
        Self {
            event: "subscribe",
            feed: feed.into(),
            product_ids,
            api_key: None,
            original_challenge: None,
            signed_challenge: None,
        }
    }

    pub fn unsubscribe(feed: impl Into<String>, product_ids: Vec<String>) -> Self {
        Self {
            event: "unsubscribe",
            ..Self::subscribe(feed, product_ids)
        }
    }

    #[must_use]
    pub fn with_auth(mut self, api_key: String, original_challenge: String, signed_challenge: String) -> Self {
        self.api_key = Some(api_key);
        self.original_challenge = Some(original_challenge);
        self.signed_challenge = Some(signed_challenge);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeRequest {
    pub event: &'static str,
    pub api_key: String,
}

impl ChallengeRequest {
    pub fn new(api_key: String) -> Self {
        Self {
            event: "challenge",
            api_key,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub event: &'static str,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { event: "ping" }
    }
}

/// Incoming messages that carry an `event` field: challenge responses,
/// subscribe/unsubscribe confirmations, and alerts/errors. Demultiplexed
/// by the session core ahead of feed messages (spec §4.4 "Message
/// demultiplexing").
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum EventMessage {
    #[serde(rename = "challenge")]
    Challenge { message: String },
    #[serde(rename = "subscribed")]
    Subscribed {
        feed: String,
        #[serde(default)]
        product_ids: Vec<String>,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        feed: String,
        #[serde(default)]
        product_ids: Vec<String>,
    },
    #[serde(rename = "info")]
    Info {
        #[serde(default)]
        version: Option<u32>,
    },
    #[serde(rename = "alert")]
    Error { message: String },
    #[serde(rename = "error")]
    ErrorEvent { message: String },
    #[serde(rename = "pong")]
    Pong {},
}

/// Incoming messages that carry a `feed` field instead of `event`: ticker
/// updates, trades, book deltas, fills, and so on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "feed")]
pub enum FeedMessage {
    #[serde(rename = "ticker")]
    Ticker {
        product_id: String,
        bid: Option<f64>,
        ask: Option<f64>,
        last: Option<f64>,
    },
    #[serde(rename = "book_snapshot")]
    BookSnapshot {
        product_id: String,
        #[serde(default)]
        bids: Vec<[f64; 2]>,
        #[serde(default)]
        asks: Vec<[f64; 2]>,
    },
    #[serde(rename = "book")]
    Book {
        product_id: String,
        side: String,
        price: f64,
        qty: f64,
    },
    #[serde(rename = "trade")]
    Trade {
        product_id: String,
        side: String,
        price: f64,
        qty: f64,
    },
    #[serde(rename = "fills")]
    Fills {
        #[serde(default)]
        fills: serde_json::Value,
    },
    #[serde(rename = "open_orders")]
    OpenOrders { order: serde_json::Value },
    #[serde(rename = "open_positions")]
    OpenPositions {
        #[serde(default)]
        positions: serde_json::Value,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat {},
}

/// The result of a signed REST call, tolerant of the Kraken quirk where
/// absence of `result` still means success if the payload parses (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RestEnvelope {
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl RestEnvelope {
    pub fn is_success(&self) -> bool {
        match &self.result {
            Some(serde_json::Value::String(s)) => s == "success",
            None => self.errors.is_empty(),
            _ => self.errors.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_serializes_without_auth_fields() {
        let req = SubscribeRequest::subscribe("ticker", vec!["PI_XBTUSD".to_string()]);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["feed"], "ticker");
        assert_eq!(json["product_ids"][0], "PI_XBTUSD");
    }

    #[test]
    fn subscribe_with_auth_includes_challenge_fields() {
        let req = SubscribeRequest::subscribe("fills", vec![])
            .with_auth("key".into(), "orig".into(), "signed".into());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["api_key"], "key");
        assert_eq!(json["original_challenge"], "orig");
        assert_eq!(json["signed_challenge"], "signed");
    }

    #[test]
    fn event_message_parses_subscribed() {
        let raw = r#"{"event":"subscribed","feed":"ticker","product_ids":["PI_XBTUSD"]}"#;
        let msg: EventMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            EventMessage::Subscribed {
                feed: "ticker".into(),
                product_ids: vec!["PI_XBTUSD".into()],
            }
        );
    }

    #[test]
    fn event_message_parses_challenge() {
        let raw = r#"{"event":"challenge","message":"abc123"}"#;
        let msg: EventMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            EventMessage::Challenge {
                message: "abc123".into()
            }
        );
    }

    #[test]
    fn feed_message_parses_ticker() {
        let raw = r#"{"feed":"ticker","product_id":"PI_XBTUSD","bid":100.0,"ask":101.0,"last":100.5}"#;
        let msg: FeedMessage = serde_json::from_str(raw).unwrap();
        match msg {
            FeedMessage::Ticker { bid, ask, last, .. } => {
                assert_eq!(bid, Some(100.0));
                assert_eq!(ask, Some(101.0));
                assert_eq!(last, Some(100.5));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn is_private_feed_classifies_correctly() {
        assert!(is_private_feed("fills"));
        assert!(is_private_feed("open_orders"));
        assert!(!is_private_feed("ticker"));
    }

    #[test]
    fn rest_envelope_treats_missing_result_as_success_when_no_errors() {
        let raw = r#"{"foo": "bar"}"#;
        let env: RestEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.is_success());
    }

    #[test]
    fn rest_envelope_success_string() {
        let raw = r#"{"result": "success", "orderId": "1"}"#;
        let env: RestEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.is_success());
    }
}
