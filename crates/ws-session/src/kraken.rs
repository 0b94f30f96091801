//! Kraken Futures [`FeedCodec`] implementation plus the session type alias.

use wire_types::kraken::{ChallengeRequest, EventMessage, FeedMessage, PingRequest, SubscribeRequest};

use crate::protocol::{AuthTicket, ControlEvent, FeedCodec, IncomingMessage};
use crate::transport::TungsteniteTransport;

#[derive(Debug, Clone, Copy, Default)]
pub struct KrakenCodec;

impl FeedCodec for KrakenCodec {
    const HAS_CHALLENGE: bool = true;

    fn encode_ping(&self) -> String {
        serde_json::to_string(&PingRequest::default()).expect("PingRequest always serializes")
    }

    fn encode_challenge_request(&self, api_key: &str) -> Option<String> {
        Some(
            serde_json::to_string(&ChallengeRequest::new(api_key.to_string()))
                .expect("ChallengeRequest always serializes"),
        )
    }

    fn encode_subscribe(&self, feed: &str, products: &[String], auth: Option<&AuthTicket>) -> String {
        let mut req = SubscribeRequest::subscribe(feed, products.to_vec());
        if let Some(ticket) = auth {
            req = req.with_auth(
                ticket.api_key.clone(),
                ticket.original_challenge.clone(),
                ticket.signed_challenge.clone(),
            );
        }
        serde_json::to_string(&req).expect("SubscribeRequest always serializes")
    }

    fn encode_unsubscribe(&self, feed: &str, products: &[String]) -> String {
        let req = SubscribeRequest::unsubscribe(feed, products.to_vec());
        serde_json::to_string(&req).expect("SubscribeRequest always serializes")
    }

    fn decode(&self, raw: &str) -> IncomingMessage {
        if let Ok(event) = serde_json::from_str::<EventMessage>(raw) {
            return IncomingMessage::Control(translate_event(event));
        }
        if let Ok(feed) = serde_json::from_str::<FeedMessage>(raw) {
            return translate_feed(raw, feed);
        }
        IncomingMessage::Unrecognized
    }

    fn is_private_feed(&self, feed: &str) -> bool {
        wire_types::kraken::is_private_feed(feed)
    }
}

fn translate_event(event: EventMessage) -> ControlEvent {
    match event {
        EventMessage::Challenge { message } => ControlEvent::Challenge { message },
        EventMessage::Subscribed { feed, product_ids } => ControlEvent::Subscribed { feed, product_ids },
        EventMessage::Unsubscribed { feed, product_ids } => ControlEvent::Unsubscribed { feed, product_ids },
        EventMessage::Info { .. } => ControlEvent::Info,
        EventMessage::Error { message } | EventMessage::ErrorEvent { message } => ControlEvent::Error { message },
        EventMessage::Pong {} => ControlEvent::Pong,
    }
}

fn translate_feed(raw: &str, feed: FeedMessage) -> IncomingMessage {
    let name = match &feed {
        FeedMessage::Ticker { .. } => "ticker",
        FeedMessage::BookSnapshot { .. } => "book_snapshot",
        FeedMessage::Book { .. } => "book",
        FeedMessage::Trade { .. } => "trade",
        FeedMessage::Fills { .. } => "fills",
        FeedMessage::OpenOrders { .. } => "open_orders",
        FeedMessage::OpenPositions { .. } => "open_positions",
        FeedMessage::Heartbeat {} => "heartbeat",
    };
    let payload: serde_json::Value = serde_json::from_str(raw).unwrap_or(serde_json::Value::Null);
    IncomingMessage::Feed {
        feed: name.to_string(),
        payload,
    }
}

/// A Kraken Futures session: `wss://futures.kraken.com/ws/v1`.
pub type KrakenSession = crate::session::Session<KrakenCodec, TungsteniteTransport>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_challenge() {
        let codec = KrakenCodec;
        let msg = codec.decode(r#"{"event":"challenge","message":"abc"}"#);
        assert_eq!(
            msg,
            IncomingMessage::Control(ControlEvent::Challenge { message: "abc".into() })
        );
    }

    #[test]
    fn decodes_ticker_feed_with_name() {
        let codec = KrakenCodec;
        let msg = codec.decode(r#"{"feed":"ticker","product_id":"PI_XBTUSD","bid":1.0,"ask":2.0,"last":1.5}"#);
        match msg {
            IncomingMessage::Feed { feed, .. } => assert_eq!(feed, "ticker"),
            other => panic!("expected feed message, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_without_auth_omits_challenge_fields() {
        let codec = KrakenCodec;
        let frame = codec.encode_subscribe("ticker", &["PI_XBTUSD".to_string()], None);
        assert!(!frame.contains("signed_challenge"));
    }

    #[test]
    fn subscribe_with_auth_includes_challenge_fields() {
        let codec = KrakenCodec;
        let ticket = AuthTicket {
            api_key: "key".into(),
            original_challenge: "orig".into(),
            signed_challenge: "signed".into(),
        };
        let frame = codec.encode_subscribe("fills", &[], Some(&ticket));
        assert!(frame.contains("\"signed_challenge\":\"signed\""));
    }

    #[test]
    fn unrecognized_text_does_not_panic() {
        let codec = KrakenCodec;
        assert_eq!(codec.decode("not json"), IncomingMessage::Unrecognized);
    }

    async fn wait_until(mut ready: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if ready() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_waits_for_ack_and_reconnect_resubscribes() {
        use crate::session::{Session, SessionConfig};
        use crate::subscription::SubscriptionKey;
        use crate::testing::{FakeTransport, FakeWire};
        use std::time::Duration;
        use url::Url;

        let (wire1, rx1) = FakeWire::new();
        FakeTransport::install(&wire1, rx1);

        let config = SessionConfig::new(Url::parse("wss://futures.kraken.com/ws/v1").unwrap());
        let handle = Session::<KrakenCodec, FakeTransport>::spawn(KrakenCodec, config);

        let sub_handle = handle.clone();
        let subscribe = tokio::spawn(
            async move { sub_handle.subscribe("ticker", Some("PI_XBTUSD".to_string())).await },
        );

        wait_until(|| !wire1.sent_frames().is_empty()).await;
        assert!(!subscribe.is_finished());

        wire1.push(r#"{"event":"subscribed","feed":"ticker","product_ids":["PI_XBTUSD"]}"#);

        // Kept alive for the rest of the test: dropping it would
        // unsubscribe and the reconnect would have nothing to resubscribe.
        let _callback = subscribe
            .await
            .expect("subscribe task did not panic")
            .expect("subscribe resolves once the ack arrives");

        let confirmed = handle.confirmed_subscriptions().await.unwrap();
        assert!(confirmed.contains(&SubscriptionKey::new("ticker", Some("PI_XBTUSD".to_string()))));

        // Pull the wire out from under the session; the worker should
        // notice the closed transport and reconnect.
        drop(wire1);

        let (wire2, rx2) = FakeWire::new();
        FakeTransport::install(&wire2, rx2);

        tokio::time::advance(Duration::from_secs(2)).await;

        wait_until(|| !wire2.sent_frames().is_empty()).await;
        let resent = wire2.sent_frames();
        assert!(
            resent.iter().any(|f| f.contains("\"ticker\"") && f.contains("PI_XBTUSD")),
            "expected the broker to resubscribe to the still-wanted feed after reconnect, got: {resent:?}"
        );
    }
}
