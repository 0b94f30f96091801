//! Wire message shapes and signing primitives for the Kraken Futures and
//! Binance Futures WebSocket/REST protocols.
//!
//! This crate has no opinion on transport or session lifecycle — see
//! `ws-session` for the state machine that uses these types.

pub mod backoff;
pub mod binance;
pub mod kraken;
pub mod signing;
