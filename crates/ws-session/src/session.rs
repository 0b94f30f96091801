//! The provider-agnostic session worker: one task per session, driving
//! the state machine documented in [`crate::state`].

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use wire_types::backoff::Backoff;

use crate::protocol::{AuthTicket, ControlEvent, FeedCodec, IncomingMessage};
use crate::state::SessionState;
use crate::subscription::{CallbackHandle, Decrement, FeedEvent, SubscriptionBroker, SubscriptionKey, Transition};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,
    #[error("session worker has shut down")]
    WorkerGone,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("signing error: {0}")]
    Signing(#[from] wire_types::signing::SigningError),
    #[error("subscription rejected: {0}")]
    SubscriptionRejected(String),
}

/// Fixed wait for the challenge-response handshake, independent of
/// [`SessionConfig::ack_timeout`] (which covers subscribe/unsubscribe
/// acknowledgements only).
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SessionConfig {
    pub url: Url,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub ping_interval: Duration,
    pub backoff: Backoff,
    /// How long to wait for a subscribe/unsubscribe acknowledgement
    /// before giving up. The challenge-response handshake has its own
    /// fixed timeout ([`CHALLENGE_TIMEOUT`]) and doesn't use this field.
    pub ack_timeout: Duration,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            api_secret: None,
            ping_interval: Duration::from_secs(30),
            backoff: Backoff::session_default(),
            ack_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.api_key = Some(api_key);
        self.api_secret = Some(api_secret);
        self
    }
}

pub(crate) enum SessionCommand {
    Subscribe {
        key: SubscriptionKey,
        resp: oneshot::Sender<Result<CallbackHandle, SessionError>>,
    },
    Disconnect,
    Reconnect,
    QueryConfirmed(oneshot::Sender<std::collections::HashSet<SubscriptionKey>>),
}

/// A handle to a running session worker. Cloning is cheap; every clone
/// talks to the same underlying task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn subscribe(
        &self,
        feed: impl Into<String>,
        product: Option<String>,
    ) -> Result<CallbackHandle, SessionError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let key = SubscriptionKey::new(feed, product);
        self.commands
            .send(SessionCommand::Subscribe { key, resp: resp_tx })
            .map_err(|_| SessionError::WorkerGone)?;
        resp_rx.await.map_err(|_| SessionError::WorkerGone)?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Disconnect)
            .map_err(|_| SessionError::WorkerGone)
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Reconnect)
            .map_err(|_| SessionError::WorkerGone)
    }

    /// The server-acknowledged subscription set, per the spec's
    /// `getSubscriptions()`.
    pub async fn confirmed_subscriptions(
        &self,
    ) -> Result<std::collections::HashSet<SubscriptionKey>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::QueryConfirmed(tx))
            .map_err(|_| SessionError::WorkerGone)?;
        rx.await.map_err(|_| SessionError::WorkerGone)
    }
}

pub struct Session<C, T = crate::transport::TungsteniteTransport> {
    _codec: std::marker::PhantomData<C>,
    _transport: std::marker::PhantomData<T>,
}

impl<C, T> Session<C, T>
where
    C: FeedCodec,
    T: Transport + 'static,
{
    pub fn spawn(codec: C, config: SessionConfig) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (decr_tx, decr_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        tokio::spawn(run::<C, T>(codec, config, cmd_rx, decr_rx, decr_tx, state_tx));
        SessionHandle {
            commands: cmd_tx,
            state: state_rx,
        }
    }
}

fn set_state(state_tx: &watch::Sender<SessionState>, state: SessionState) {
    debug!(%state, "session state transition");
    let _ = state_tx.send(state);
}

async fn run<C, T>(
    codec: C,
    config: SessionConfig,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut decrements: mpsc::UnboundedReceiver<Decrement>,
    decr_tx: mpsc::UnboundedSender<Decrement>,
    state_tx: watch::Sender<SessionState>,
) where
    C: FeedCodec,
    T: Transport,
{
    let mut backoff = config.backoff.clone();
    let mut rng = rand::rng();
    let mut broker = SubscriptionBroker::default();
    let mut auth: Option<AuthTicket> = None;
    let mut first_connect = true;

    set_state(&state_tx, SessionState::Connecting);

    'reconnect: loop {
        let mut transport = match T::connect(&config.url).await {
            Ok(t) => t,
            Err(err) => {
                warn!(error = %err, "connect failed");
                if !wait_for_retry(&mut backoff, &mut rng, &state_tx, &mut commands, &mut broker, &decr_tx).await {
                    return;
                }
                continue 'reconnect;
            }
        };

        if C::HAS_CHALLENGE {
            if let (Some(api_key), Some(secret)) = (&config.api_key, &config.api_secret) {
                match authenticate::<C, T>(&codec, &mut transport, api_key, secret, CHALLENGE_TIMEOUT).await {
                    Ok(ticket) => auth = Some(ticket),
                    Err(err) => {
                        warn!(error = %err, "authentication failed");
                        if !wait_for_retry(&mut backoff, &mut rng, &state_tx, &mut commands, &mut broker, &decr_tx).await {
                            return;
                        }
                        continue 'reconnect;
                    }
                }
            }
        }

        set_state(&state_tx, SessionState::Connected);
        // Per the reconnect policy, the attempt counter only resets on a
        // fresh connect; it carries across automatic reconnects so a
        // flapping connection eventually lands in DISCONNECTED instead of
        // retrying forever.
        if first_connect {
            backoff.reset();
            first_connect = false;
        }

        for key in broker.wanted_keys() {
            let frame = codec.encode_subscribe(&key.feed, product_slice(&key), resolve_auth(&codec, &key, &auth));
            if transport.send(frame).await.is_err() {
                break;
            }
        }

        let mut ping_timer = tokio::time::interval(config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await; // consume the immediate first tick

        let mut pending_acks: HashMap<String, Vec<PendingSubscribeAck>> = HashMap::new();
        let mut next_ack_id: u64 = 0;
        let (ack_timeout_tx, mut ack_timeouts) = mpsc::unbounded_channel::<(String, u64)>();

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => {
                    match cmd {
                        None => {
                            reject_all_pending(&mut pending_acks, "session worker shutting down");
                            return;
                        }
                        Some(SessionCommand::Disconnect) => {
                            transport.close().await;
                            reject_all_pending(&mut pending_acks, "session disconnected");
                            set_state(&state_tx, SessionState::Disconnected);
                            return;
                        }
                        Some(SessionCommand::Reconnect) => {
                            transport.close().await;
                            break;
                        }
                        Some(cmd) => {
                            if !handle_command(
                                cmd,
                                &codec,
                                &mut broker,
                                &auth,
                                &mut transport,
                                &decr_tx,
                                &mut pending_acks,
                                &ack_timeout_tx,
                                config.ack_timeout,
                                &mut next_ack_id,
                            ).await {
                                break;
                            }
                        }
                    }
                }

                Some(dec) = decrements.recv() => {
                    if broker.remove(&dec.key, dec.id) {
                        let frame = codec.encode_unsubscribe(&dec.key.feed, product_slice(&dec.key));
                        let _ = transport.send(frame).await;
                    }
                }

                Some((feed, ack_id)) = ack_timeouts.recv() => {
                    reject_pending_ack_by_id(&mut pending_acks, &feed, ack_id, SessionError::Timeout("subscribe acknowledgement"));
                }

                _ = ping_timer.tick() => {
                    let _ = transport.send(codec.encode_ping()).await;
                }

                incoming = transport.recv() => {
                    match incoming {
                        None | Some(Err(_)) => {
                            info!("transport closed, reconnecting");
                            break;
                        }
                        Some(Ok(text)) => {
                            handle_incoming(&codec, &text, &mut broker, &mut pending_acks);
                        }
                    }
                }
            }
        }

        reject_all_pending(&mut pending_acks, "session reconnecting");

        if !wait_for_retry(&mut backoff, &mut rng, &state_tx, &mut commands, &mut broker, &decr_tx).await {
            return;
        }
    }
}

/// A caller-initiated `subscribe()` waiting on a `subscribed`
/// acknowledgement (or rejection) for one `(action, feed)` pair.
struct PendingSubscribeAck {
    ack_id: u64,
    handle: Option<CallbackHandle>,
    resp: oneshot::Sender<Result<CallbackHandle, SessionError>>,
}

fn resolve_pending_subscribe(pending: &mut HashMap<String, Vec<PendingSubscribeAck>>, feed: &str) {
    if let Some(waiters) = pending.remove(feed) {
        for mut waiter in waiters {
            if let Some(handle) = waiter.handle.take() {
                let _ = waiter.resp.send(Ok(handle));
            }
        }
    }
}

/// The provider's `error` event carries no feed correlation on the
/// wire, so every subscribe currently in flight is rejected rather than
/// guessing which one it was for.
fn reject_all_pending(pending: &mut HashMap<String, Vec<PendingSubscribeAck>>, message: &str) {
    for (_feed, waiters) in pending.drain() {
        for waiter in waiters {
            let _ = waiter.resp.send(Err(SessionError::SubscriptionRejected(message.to_string())));
        }
    }
}

fn reject_pending_ack_by_id(
    pending: &mut HashMap<String, Vec<PendingSubscribeAck>>,
    feed: &str,
    ack_id: u64,
    err: SessionError,
) {
    let Some(waiters) = pending.get_mut(feed) else { return };
    let Some(pos) = waiters.iter().position(|w| w.ack_id == ack_id) else { return };
    let waiter = waiters.remove(pos);
    if waiters.is_empty() {
        pending.remove(feed);
    }
    let _ = waiter.resp.send(Err(err));
}

fn product_slice(key: &SubscriptionKey) -> &[String] {
    key.product.as_ref().map_or(&[], std::slice::from_ref)
}

fn resolve_auth<'a, C: FeedCodec>(
    codec: &C,
    key: &SubscriptionKey,
    auth: &'a Option<AuthTicket>,
) -> Option<&'a AuthTicket> {
    if codec.is_private_feed(&key.feed) {
        auth.as_ref()
    } else {
        None
    }
}

async fn authenticate<C, T>(
    codec: &C,
    transport: &mut T,
    api_key: &str,
    secret: &str,
    challenge_timeout: Duration,
) -> Result<AuthTicket, SessionError>
where
    C: FeedCodec,
    T: Transport,
{
    let frame = codec
        .encode_challenge_request(api_key)
        .expect("HAS_CHALLENGE implies encode_challenge_request is Some");
    transport.send(frame).await?;

    let challenge = loop {
        let incoming = timeout(challenge_timeout, transport.recv())
            .await
            .map_err(|_| SessionError::Timeout("challenge"))?
            .ok_or(SessionError::NotConnected)??;
        match codec.decode(&incoming) {
            IncomingMessage::Control(ControlEvent::Challenge { message }) => break message,
            _ => continue,
        }
    };

    let signed = wire_types::signing::challenge_signature(secret, &challenge)?;
    Ok(AuthTicket {
        api_key: api_key.to_string(),
        original_challenge: challenge,
        signed_challenge: signed,
    })
}

/// Returns `false` if the command channel closed or attempts are
/// exhausted and the worker should exit entirely.
async fn wait_for_retry(
    backoff: &mut Backoff,
    rng: &mut impl rand::Rng,
    state_tx: &watch::Sender<SessionState>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    broker: &mut SubscriptionBroker,
    decr_tx: &mpsc::UnboundedSender<Decrement>,
) -> bool {
    if backoff.attempts_exhausted() {
        set_state(state_tx, SessionState::Disconnected);
        // Keep answering queries and registering subscriptions against a
        // dead session rather than dropping pending callers; none of it
        // will reach the wire again.
        while let Some(cmd) = commands.recv().await {
            register_while_disconnected(cmd, broker, decr_tx);
        }
        return false;
    }

    set_state(state_tx, SessionState::Reconnecting);
    let delay = backoff.next_delay(rng);
    tokio::select! {
        _ = tokio::time::sleep(delay) => {
            set_state(state_tx, SessionState::Connecting);
            true
        }
        cmd = commands.recv() => match cmd {
            None => false,
            Some(SessionCommand::Disconnect) => {
                set_state(state_tx, SessionState::Disconnected);
                false
            }
            Some(other) => {
                register_while_disconnected(other, broker, decr_tx);
                true
            }
        }
    }
}

/// Subscribe/unsubscribe requests arriving while there is no live
/// transport still update the broker so the next successful connect
/// resubscribes to everything that's currently wanted.
fn register_while_disconnected(
    cmd: SessionCommand,
    broker: &mut SubscriptionBroker,
    decr_tx: &mpsc::UnboundedSender<Decrement>,
) {
    match cmd {
        SessionCommand::Subscribe { key, resp } => {
            let (id, events, _transition) = broker.add(key.clone());
            let handle = CallbackHandle::new(key, id, decr_tx.clone(), events);
            let _ = resp.send(Ok(handle));
        }
        SessionCommand::QueryConfirmed(tx) => {
            let _ = tx.send(broker.confirmed_keys());
        }
        SessionCommand::Disconnect | SessionCommand::Reconnect => {}
    }
}

/// Processes a command while connected. Returns `false` if the
/// connection should be torn down (currently never, kept for symmetry
/// with the incoming-message branch).
#[allow(clippy::too_many_arguments)]
async fn handle_command<C, T>(
    cmd: SessionCommand,
    codec: &C,
    broker: &mut SubscriptionBroker,
    auth: &Option<AuthTicket>,
    transport: &mut T,
    decr_tx: &mpsc::UnboundedSender<Decrement>,
    pending_acks: &mut HashMap<String, Vec<PendingSubscribeAck>>,
    ack_timeout_tx: &mpsc::UnboundedSender<(String, u64)>,
    ack_timeout: Duration,
    next_ack_id: &mut u64,
) -> bool
where
    C: FeedCodec,
    T: Transport,
{
    match cmd {
        SessionCommand::Subscribe { key, resp } => {
            let (id, events, transition) = broker.add(key.clone());
            let handle = CallbackHandle::new(key.clone(), id, decr_tx.clone(), events);
            match transition {
                Transition::NowWanted => {
                    let frame = codec.encode_subscribe(&key.feed, product_slice(&key), resolve_auth(codec, &key, auth));
                    match transport.send(frame).await {
                        Ok(()) => {
                            let ack_id = *next_ack_id;
                            *next_ack_id += 1;
                            pending_acks.entry(key.feed.clone()).or_default().push(PendingSubscribeAck {
                                ack_id,
                                handle: Some(handle),
                                resp,
                            });
                            let feed = key.feed.clone();
                            let timeout_tx = ack_timeout_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(ack_timeout).await;
                                let _ = timeout_tx.send((feed, ack_id));
                            });
                        }
                        Err(err) => {
                            let _ = resp.send(Err(SessionError::Transport(err)));
                        }
                    }
                }
                Transition::AlreadyWanted => {
                    let _ = resp.send(Ok(handle));
                }
            }
        }
        SessionCommand::QueryConfirmed(tx) => {
            let _ = tx.send(broker.confirmed_keys());
        }
        SessionCommand::Disconnect | SessionCommand::Reconnect => {
            // Handled by the caller before reaching here.
        }
    }
    true
}

fn handle_incoming<C: FeedCodec>(
    codec: &C,
    text: &str,
    broker: &mut SubscriptionBroker,
    pending_acks: &mut HashMap<String, Vec<PendingSubscribeAck>>,
) {
    match codec.decode(text) {
        IncomingMessage::Control(ControlEvent::Subscribed { feed, product_ids }) => {
            resolve_pending_subscribe(pending_acks, &feed);
            mark_confirmation(broker, feed, product_ids, true);
        }
        IncomingMessage::Control(ControlEvent::Unsubscribed { feed, product_ids }) => {
            mark_confirmation(broker, feed, product_ids, false);
        }
        IncomingMessage::Control(ControlEvent::Error { message }) => {
            warn!(%message, "provider reported an error event");
            reject_all_pending(pending_acks, &message);
        }
        IncomingMessage::Control(_) => {}
        IncomingMessage::Feed { feed, payload } => {
            let product = payload
                .get("product_id")
                .or_else(|| payload.get("s"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let key = SubscriptionKey::new(feed.clone(), product.clone());
            let event = FeedEvent { feed, product, payload };
            broker.dispatch(&key, &event);
            let wildcard = SubscriptionKey::new(event.feed.clone(), None);
            if wildcard != key {
                broker.dispatch(&wildcard, &event);
            }
        }
        IncomingMessage::Unrecognized => {
            debug!(%text, "unrecognized message");
        }
    }
}

fn mark_confirmation(broker: &mut SubscriptionBroker, feed: String, product_ids: Vec<String>, confirmed: bool) {
    let keys: Vec<SubscriptionKey> = if product_ids.is_empty() {
        vec![SubscriptionKey::new(feed, None)]
    } else {
        product_ids
            .into_iter()
            .map(|p| SubscriptionKey::new(feed.clone(), Some(p)))
            .collect()
    };
    for key in keys {
        if confirmed {
            broker.mark_confirmed(key);
        } else {
            broker.mark_unconfirmed(&key);
        }
    }
}
