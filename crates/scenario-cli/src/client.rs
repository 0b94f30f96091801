//! Generic REST-forwarding [`Invokable`]: `targetMethod` is treated as
//! an endpoint path under the provider's REST prefix, and the
//! resolved parameter map becomes the URL-form-encoded body (or is
//! dropped for a no-parameter GET). A provider-specific mapper
//! function turning named business methods into typed requests is
//! explicitly out of scope (§1 Non-goals: "canonical trading
//! façades"); this is the minimal dispatch surface scenario files
//! exercise the registry and C3 through.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;

use scenario_engine::registry::DispatchArgs;
use scenario_engine::sentinel::{MarketData, MarketDataError};
use scenario_engine::Invokable;
use ws_session::rest::RestClient;

pub struct RestAdapter {
    rest: Arc<RestClient>,
}

impl RestAdapter {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }

    fn encode(params: &scenario_engine::ParamMap) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            serializer.append_pair(key, &rendered);
        }
        serializer.finish()
    }
}

#[async_trait]
impl Invokable for RestAdapter {
    // Open-ended: any method name forwards to the REST endpoint of the
    // same name, so there's no fixed list to report.
    fn methods(&self) -> Vec<&'static str> {
        Vec::new()
    }

    // Every method is dispatched with the full parameter map as a
    // single object: `usize::MAX` never satisfies the positional-arity
    // branch in `resolve_dispatch_args`, so it always falls through to
    // "pass as object" regardless of how many params the scenario passes.
    fn param_count(&self, _method: &str) -> Option<usize> {
        Some(usize::MAX)
    }

    async fn invoke(&self, method: &str, args: DispatchArgs) -> Result<serde_json::Value, anyhow::Error> {
        let params = match args {
            DispatchArgs::Object(map) => map,
            DispatchArgs::Single(value) => {
                let mut map = scenario_engine::ParamMap::new();
                map.insert("value".to_string(), value);
                map
            }
            _ => scenario_engine::ParamMap::new(),
        };

        let endpoint_path = if method.starts_with('/') { method.to_string() } else { format!("/{method}") };
        let post_data = Self::encode(&params);
        let http_method = if post_data.is_empty() { Method::GET } else { Method::POST };

        let envelope = self.rest.call(http_method, &endpoint_path, &post_data).await?;
        Ok(serde_json::json!({
            "success": envelope.is_success(),
            "data": envelope.payload,
            "result": envelope.result,
            "errors": envelope.errors,
        }))
    }
}

#[async_trait]
impl MarketData for RestAdapter {
    async fn bid(&self, instrument: &str) -> Result<f64, MarketDataError> {
        self.ticker_field(instrument, "bid").await
    }

    async fn ask(&self, instrument: &str) -> Result<f64, MarketDataError> {
        self.ticker_field(instrument, "ask").await
    }

    async fn last(&self, instrument: &str) -> Result<f64, MarketDataError> {
        self.ticker_field(instrument, "last").await
    }
}

impl RestAdapter {
    async fn ticker_field(&self, instrument: &str, field: &str) -> Result<f64, MarketDataError> {
        let endpoint_path = format!("/tickers/{instrument}");
        let envelope = self
            .rest
            .call(Method::GET, &endpoint_path, "")
            .await
            .map_err(|err| MarketDataError::Unavailable(instrument.to_string(), err.to_string()))?;
        envelope
            .payload
            .get(field)
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| MarketDataError::Unavailable(instrument.to_string(), format!("ticker missing `{field}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_renders_string_values_without_json_quoting() {
        let mut params = scenario_engine::ParamMap::new();
        params.insert("symbol".to_string(), serde_json::json!("PI_XBTUSD"));
        let encoded = RestAdapter::encode(&params);
        assert_eq!(encoded, "symbol=PI_XBTUSD");
    }

    #[test]
    fn encode_renders_numeric_values() {
        let mut params = scenario_engine::ParamMap::new();
        params.insert("size".to_string(), serde_json::json!(10));
        let encoded = RestAdapter::encode(&params);
        assert_eq!(encoded, "size=10");
    }
}
