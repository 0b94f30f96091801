//! Reference-counted subscription bookkeeping.
//!
//! Several callers may independently want the same `(feed, product)`
//! pair. The broker only emits a wire-level `subscribe` on the 0→1
//! transition and a wire-level `unsubscribe` on the 1→0 transition;
//! everything in between is local bookkeeping. Dropping a
//! [`CallbackHandle`] without calling [`CallbackHandle::unsubscribe`]
//! still decrements the count, mirroring how a dropped query
//! subscription unsubscribes itself.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub feed: String,
    /// `None` for feed-wide subscriptions that carry no product filter
    /// (Kraken's `fills`, `open_orders`, `open_positions`).
    pub product: Option<String>,
}

impl SubscriptionKey {
    pub fn new(feed: impl Into<String>, product: Option<String>) -> Self {
        Self {
            feed: feed.into(),
            product,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub feed: String,
    pub product: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
pub(crate) struct Decrement {
    pub key: SubscriptionKey,
    pub id: u64,
}

/// Returned by `Session::subscribe`. Delivers matching [`FeedEvent`]s on
/// `events` until unsubscribed.
pub struct CallbackHandle {
    pub(crate) key: SubscriptionKey,
    pub(crate) id: u64,
    pub(crate) control: UnboundedSender<Decrement>,
    pub(crate) events: tokio::sync::mpsc::UnboundedReceiver<FeedEvent>,
    active: bool,
}

impl CallbackHandle {
    pub(crate) fn new(
        key: SubscriptionKey,
        id: u64,
        control: UnboundedSender<Decrement>,
        events: tokio::sync::mpsc::UnboundedReceiver<FeedEvent>,
    ) -> Self {
        Self {
            key,
            id,
            control,
            events,
            active: true,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Explicitly unsubscribe. Equivalent to dropping the handle, but
    /// lets a caller observe completion isn't needed since decrementing
    /// is synchronous bookkeeping on the session's side.
    pub fn unsubscribe(mut self) {
        self.send_decrement();
    }

    fn send_decrement(&mut self) {
        if self.active {
            self.active = false;
            let _ = self.control.send(Decrement {
                key: self.key.clone(),
                id: self.id,
            });
        }
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.send_decrement();
    }
}

#[derive(Debug, Default)]
struct Entry {
    next_id: u64,
    subscribers: HashMap<u64, UnboundedSender<FeedEvent>>,
}

/// Lives inside the session worker task; never shared across tasks.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionBroker {
    entries: HashMap<SubscriptionKey, Entry>,
    confirmed: std::collections::HashSet<SubscriptionKey>,
}

pub(crate) enum Transition {
    /// First subscriber for this key: caller must send a wire subscribe.
    NowWanted,
    /// Already had at least one subscriber: no wire action needed.
    AlreadyWanted,
}

impl SubscriptionBroker {
    /// Registers a new subscriber, returning its id, the channel to hand
    /// back in a [`CallbackHandle`], and whether this was the first
    /// subscriber for the key.
    pub fn add(
        &mut self,
        key: SubscriptionKey,
    ) -> (u64, tokio::sync::mpsc::UnboundedReceiver<FeedEvent>, Transition) {
        let entry = self.entries.entry(key).or_default();
        let transition = if entry.subscribers.is_empty() {
            Transition::NowWanted
        } else {
            Transition::AlreadyWanted
        };
        let id = entry.next_id;
        entry.next_id += 1;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        entry.subscribers.insert(id, tx);
        (id, rx, transition)
    }

    /// Returns `true` if the 1→0 transition happened and a wire
    /// unsubscribe should be sent.
    pub fn remove(&mut self, key: &SubscriptionKey, id: u64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.subscribers.remove(&id);
        if entry.subscribers.is_empty() {
            self.entries.remove(key);
            self.confirmed.remove(key);
            true
        } else {
            false
        }
    }

    pub fn mark_confirmed(&mut self, key: SubscriptionKey) {
        self.confirmed.insert(key);
    }

    pub fn mark_unconfirmed(&mut self, key: &SubscriptionKey) {
        self.confirmed.remove(key);
    }

    /// The set the broker should re-subscribe to after a reconnect: every
    /// key with at least one live subscriber, confirmed or not.
    pub fn wanted_keys(&self) -> Vec<SubscriptionKey> {
        self.entries.keys().cloned().collect()
    }

    /// Per spec `getSubscriptions()`: only feeds the server has
    /// acknowledged.
    pub fn confirmed_keys(&self) -> std::collections::HashSet<SubscriptionKey> {
        self.confirmed.clone()
    }

    pub fn dispatch(&self, key: &SubscriptionKey, event: &FeedEvent) {
        if let Some(entry) = self.entries.get(key) {
            for sender in entry.subscribers.values() {
                let _ = sender.send(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_ne;

    fn key(feed: &str) -> SubscriptionKey {
        SubscriptionKey::new(feed, None)
    }

    #[test]
    fn first_subscriber_triggers_now_wanted() {
        let mut broker = SubscriptionBroker::default();
        let (_, _, transition) = broker.add(key("ticker"));
        assert!(matches!(transition, Transition::NowWanted));
    }

    #[test]
    fn second_subscriber_is_already_wanted_and_stacks() {
        let mut broker = SubscriptionBroker::default();
        let (id_a, _, _) = broker.add(key("ticker"));
        let (id_b, _, transition) = broker.add(key("ticker"));
        assert!(matches!(transition, Transition::AlreadyWanted));
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn removing_last_subscriber_triggers_wire_unsubscribe() {
        let mut broker = SubscriptionBroker::default();
        let (id, _, _) = broker.add(key("ticker"));
        assert!(broker.remove(&key("ticker"), id));
    }

    #[test]
    fn removing_one_of_two_does_not_trigger_wire_unsubscribe() {
        let mut broker = SubscriptionBroker::default();
        let (id_a, _, _) = broker.add(key("ticker"));
        let (_id_b, _, _) = broker.add(key("ticker"));
        assert!(!broker.remove(&key("ticker"), id_a));
    }

    #[test]
    fn confirmed_keys_reflects_only_acked_subscriptions() {
        let mut broker = SubscriptionBroker::default();
        broker.add(key("ticker"));
        assert!(broker.confirmed_keys().is_empty());
        broker.mark_confirmed(key("ticker"));
        assert!(broker.confirmed_keys().contains(&key("ticker")));
    }
}
