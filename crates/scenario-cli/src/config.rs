//! Per-provider `ProviderConfig` loading: CLI flags take precedence,
//! then well-known environment variables, then network-keyed defaults
//! (§6's "Provider config" / §4.5 step 2's credential fallback).

use scenario_engine::ProviderConfig;

struct ProviderDefaults {
    testnet_rest: &'static str,
    mainnet_rest: &'static str,
    testnet_ws: &'static str,
    mainnet_ws: &'static str,
}

fn defaults_for(provider: &str) -> ProviderDefaults {
    match provider {
        "binance" => ProviderDefaults {
            testnet_rest: "https://testnet.binancefuture.com",
            mainnet_rest: "https://fapi.binance.com",
            testnet_ws: "wss://stream.binancefuture.com/ws",
            mainnet_ws: "wss://fstream.binance.com/ws",
        },
        // kraken and anything unrecognised fall back to Kraken Futures'
        // hosts; the loader never fails on an unknown provider name.
        _ => ProviderDefaults {
            testnet_rest: "https://demo-futures.kraken.com",
            mainnet_rest: "https://futures.kraken.com",
            testnet_ws: "wss://demo-futures.kraken.com/ws/v1",
            mainnet_ws: "wss://futures.kraken.com/ws/v1",
        },
    }
}

/// Builds a [`ProviderConfig`] for `provider` ("kraken" or "binance")
/// against `network` ("TESTNET" or "MAINNET"), reading
/// `{PROVIDER}_API_KEY` / `{PROVIDER}_API_SECRET` /
/// `{PROVIDER}_BASE_URL` / `{PROVIDER}_WS_URL` from the environment.
pub fn load(provider: &str, network: &str) -> ProviderConfig {
    let prefix = provider.to_ascii_uppercase();
    let defaults = defaults_for(provider);
    let is_mainnet = network.eq_ignore_ascii_case("MAINNET");

    let base_url = std::env::var(format!("{prefix}_BASE_URL"))
        .unwrap_or_else(|_| if is_mainnet { defaults.mainnet_rest } else { defaults.testnet_rest }.to_string());
    let ws_url = std::env::var(format!("{prefix}_WS_URL"))
        .unwrap_or_else(|_| if is_mainnet { defaults.mainnet_ws } else { defaults.testnet_ws }.to_string());

    ProviderConfig {
        api_key: std::env::var(format!("{prefix}_API_KEY")).unwrap_or_default(),
        api_secret: std::env::var(format!("{prefix}_API_SECRET")).unwrap_or_default(),
        base_url,
        ws_url,
        network: network.to_string(),
    }
}
