//! WebSocket session state machine shared by the Kraken Futures and
//! Binance Futures adapters.
//!
//! The state machine, reconnect/backoff policy, ping keep-alive, and
//! reference-counted subscription bookkeeping are provider-agnostic and
//! live in [`session`]. Each provider only supplies a [`protocol::FeedCodec`]
//! that knows how to build subscribe frames and classify incoming text.

pub mod binance;
pub mod kraken;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod state;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use binance::BinanceSession;
pub use kraken::KrakenSession;
pub use protocol::{ControlEvent, FeedCodec, IncomingMessage};
pub use rest::{RestClient, RestError};
pub use session::{Session, SessionConfig, SessionError, SessionHandle};
pub use state::SessionState;
pub use subscription::{CallbackHandle, FeedEvent};
