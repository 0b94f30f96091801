//! Binance Futures [`FeedCodec`] implementation plus the session type
//! alias. Structurally identical to [`crate::kraken`] minus the
//! challenge step: private streams are authenticated out-of-band by
//! appending a `listen_key` to the connection URL, so `encode_subscribe`
//! never needs an [`AuthTicket`].

use std::sync::atomic::{AtomicU64, Ordering};

use wire_types::binance::{FeedMessage, SubscribeRequest};

use crate::protocol::{AuthTicket, ControlEvent, FeedCodec, IncomingMessage};
use crate::transport::TungsteniteTransport;

#[derive(Debug, Default)]
pub struct BinanceCodec {
    next_id: AtomicU64,
}

impl Clone for BinanceCodec {
    fn clone(&self) -> Self {
        Self {
            next_id: AtomicU64::new(self.next_id.load(Ordering::Relaxed)),
        }
    }
}

impl BinanceCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_name(feed: &str, product: &str) -> String {
        format!("{}@{feed}", product.to_lowercase())
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl FeedCodec for BinanceCodec {
    const HAS_CHALLENGE: bool = false;

    fn encode_ping(&self) -> String {
        // Binance's WS gateway expects protocol-level ping frames, not a
        // JSON payload; an empty SUBSCRIBE-less keepalive is a harmless
        // application-level no-op the server ignores.
        serde_json::to_string(&SubscribeRequest::subscribe(vec![], self.next_request_id()))
            .expect("SubscribeRequest always serializes")
    }

    fn encode_challenge_request(&self, _api_key: &str) -> Option<String> {
        None
    }

    fn encode_subscribe(&self, feed: &str, products: &[String], _auth: Option<&AuthTicket>) -> String {
        let streams = products.iter().map(|p| Self::stream_name(feed, p)).collect();
        let req = SubscribeRequest::subscribe(streams, self.next_request_id());
        serde_json::to_string(&req).expect("SubscribeRequest always serializes")
    }

    fn encode_unsubscribe(&self, feed: &str, products: &[String]) -> String {
        let streams = products.iter().map(|p| Self::stream_name(feed, p)).collect();
        let req = SubscribeRequest::unsubscribe(streams, self.next_request_id());
        serde_json::to_string(&req).expect("SubscribeRequest always serializes")
    }

    fn decode(&self, raw: &str) -> IncomingMessage {
        if let Ok(feed) = serde_json::from_str::<FeedMessage>(raw) {
            let name = match &feed {
                FeedMessage::BookTicker { .. } => "bookTicker",
                FeedMessage::Trade { .. } => "trade",
                FeedMessage::OrderTradeUpdate { .. } => "ORDER_TRADE_UPDATE",
                FeedMessage::AccountUpdate { .. } => "ACCOUNT_UPDATE",
            };
            let payload: serde_json::Value = serde_json::from_str(raw).unwrap_or(serde_json::Value::Null);
            return IncomingMessage::Feed {
                feed: name.to_string(),
                payload,
            };
        }
        if raw.contains("\"result\"") {
            return IncomingMessage::Control(ControlEvent::Info);
        }
        IncomingMessage::Unrecognized
    }

    fn is_private_feed(&self, feed: &str) -> bool {
        wire_types::binance::is_private_feed(feed)
    }
}

/// A Binance Futures session: `wss://fstream.binance.com/ws`.
pub type BinanceSession = crate::session::Session<BinanceCodec, TungsteniteTransport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_lowercases_product() {
        assert_eq!(BinanceCodec::stream_name("bookTicker", "BTCUSDT"), "btcusdt@bookTicker");
    }

    #[test]
    fn encode_subscribe_uses_method_subscribe() {
        let codec = BinanceCodec::new();
        let frame = codec.encode_subscribe("bookTicker", &["BTCUSDT".to_string()], None);
        assert!(frame.contains("\"SUBSCRIBE\""));
        assert!(frame.contains("btcusdt@bookTicker"));
    }

    #[test]
    fn decodes_book_ticker_feed() {
        let codec = BinanceCodec::new();
        let msg = codec.decode(r#"{"e":"bookTicker","s":"BTCUSDT","b":"1","a":"2"}"#);
        match msg {
            IncomingMessage::Feed { feed, .. } => assert_eq!(feed, "bookTicker"),
            other => panic!("expected feed message, got {other:?}"),
        }
    }

    #[test]
    fn request_ids_increase_monotonically() {
        let codec = BinanceCodec::new();
        let a = codec.next_request_id();
        let b = codec.next_request_id();
        assert!(b > a);
    }
}
