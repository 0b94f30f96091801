//! Dynamic parameter sentinels (§4.5 step 6, §9's "fixed enumerated
//! set" re-architecture note). A sentinel string in a scenario's
//! parameter map is rewritten from live market data just before the
//! primary method dispatches.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    DynamicLimitBuy,
    DynamicLimitSell,
    DynamicMarketableBuy,
    DynamicMarketableSell,
    DynamicGtxBuy,
    DynamicGtxSell,
    DynamicStopBuy,
    DynamicStopSell,
    DynamicMinNotional,
    FutureTimestamp,
}

impl Sentinel {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "$DYNAMIC_LIMIT_BUY" => Self::DynamicLimitBuy,
            "$DYNAMIC_LIMIT_SELL" => Self::DynamicLimitSell,
            "$DYNAMIC_MARKETABLE_BUY" => Self::DynamicMarketableBuy,
            "$DYNAMIC_MARKETABLE_SELL" => Self::DynamicMarketableSell,
            "$DYNAMIC_GTX_BUY" => Self::DynamicGtxBuy,
            "$DYNAMIC_GTX_SELL" => Self::DynamicGtxSell,
            "$DYNAMIC_STOP_BUY" => Self::DynamicStopBuy,
            "$DYNAMIC_STOP_SELL" => Self::DynamicStopSell,
            "$DYNAMIC_MIN_NOTIONAL" => Self::DynamicMinNotional,
            "$FUTURE_TIMESTAMP" => Self::FutureTimestamp,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data unavailable for {0}: {1}")]
    Unavailable(String, String),
}

/// Bid/ask/last for a single instrument, sourced from the trading
/// client's market-data endpoints (§4.5 step 6).
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn bid(&self, instrument: &str) -> Result<f64, MarketDataError>;
    async fn ask(&self, instrument: &str) -> Result<f64, MarketDataError>;
    async fn last(&self, instrument: &str) -> Result<f64, MarketDataError>;
}

/// Resolves a single sentinel against live market data for `instrument`.
/// A resolution failure is always propagated, never silently replaced
/// with the literal sentinel string (§4.5 step 6).
pub async fn resolve(
    sentinel: Sentinel,
    instrument: &str,
    market: &dyn MarketData,
) -> Result<serde_json::Value, MarketDataError> {
    use Sentinel::*;
    let value = match sentinel {
        DynamicLimitBuy => round2(market.ask(instrument).await? * 0.95),
        DynamicLimitSell => round2(market.bid(instrument).await? * 1.05),
        DynamicMarketableBuy => market.ask(instrument).await? * 1.02,
        DynamicMarketableSell => market.bid(instrument).await? * 0.98,
        DynamicGtxBuy => market.bid(instrument).await? * 0.999,
        DynamicGtxSell => market.ask(instrument).await? * 1.001,
        DynamicStopBuy => market.last(instrument).await? * 1.05,
        DynamicStopSell => market.last(instrument).await? * 0.95,
        DynamicMinNotional => {
            let last = market.last(instrument).await?;
            105.0 / last
        }
        FutureTimestamp => {
            return Ok(serde_json::json!(future_timestamp_ms()));
        }
    };
    Ok(serde_json::json!(value))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn future_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_millis() as u64 + 24 * 60 * 60 * 1000
}
