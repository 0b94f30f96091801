//! Thin runner: load scenario files for a provider, dispatch each
//! through the orchestrator, print a per-scenario report, exit 0/1
//! per §6.

mod client;
mod config;
mod event_source;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use url::Url;

use scenario_engine::registry::{BuiltInstance, ClassFactory};
use scenario_engine::{Orchestrator, Registry, ScenarioLoader};
use ws_session::binance::BinanceCodec;
use ws_session::kraken::KrakenCodec;
use ws_session::rest::RestClient;
use ws_session::session::{Session, SessionConfig};

use client::RestAdapter;
use event_source::WsEventSource;

#[derive(Parser)]
#[command(name = "scenario-cli", about = "Runs declarative trading-provider adapter scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Loads `<scenarios-path>/<provider>.json` and runs every enabled,
    /// tag-matching scenario against the named provider.
    Run {
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "TESTNET")]
        network: String,
        #[arg(long, default_value = "./scenarios")]
        scenarios_path: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        include_disabled: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let Command::Run { provider, network, scenarios_path, tags, include_disabled } = cli.command;

    let provider_config = config::load(&provider, &network);
    let loader = ScenarioLoader::new(&scenarios_path);
    let file = loader.load(&provider, &format!("{provider}.json"));
    if let Some(note) = &file.load_note {
        tracing::warn!(provider = %provider, note, "scenario file did not load cleanly");
    }
    let selected = scenario_engine::loader::filter(&file, &tags, include_disabled);
    tracing::info!(provider = %provider, count = selected.len(), "scenarios selected");

    let rest_url: Url = provider_config.base_url.parse().context("invalid base_url")?;
    let rest = Arc::new(
        RestClient::trading(rest_url, provider_config.api_key.clone(), provider_config.api_secret.clone())
            .context("failed to build REST client")?,
    );

    let ws_url: Url = provider_config.ws_url.parse().context("invalid ws_url")?;
    let mut session_config = SessionConfig::new(ws_url);
    if !provider_config.api_key.is_empty() {
        session_config = session_config.with_credentials(provider_config.api_key.clone(), provider_config.api_secret.clone());
    }
    let session_handle = if provider == "binance" {
        Session::<BinanceCodec>::spawn(BinanceCodec::new(), session_config)
    } else {
        Session::<KrakenCodec>::spawn(KrakenCodec, session_config)
    };
    let event_source = Arc::new(WsEventSource::new(session_handle));

    let mut registry = Registry::new();
    let adapter = Arc::new(RestAdapter::new(rest.clone()));
    for class_name in ["KrakenClient", "BinanceClient"] {
        let adapter = adapter.clone();
        registry.register(ClassFactory {
            class_name: class_name.to_string(),
            dependencies: vec![],
            build: Arc::new(move |_config, _deps| adapter.clone() as BuiltInstance),
        });
    }

    let market: Arc<dyn scenario_engine::MarketData> = adapter;
    let mut orchestrator = Orchestrator::new(registry, provider_config, provider.clone(), market, event_source);

    let mut any_failed = false;
    for (id, name, scenario) in selected {
        let result = orchestrator.run(scenario).await;
        if result.passed {
            tracing::info!(id, name, elapsed_ms = result.elapsed.as_millis() as u64, "PASS");
        } else {
            any_failed = true;
            tracing::error!(id, name, error = ?result.error, details = ?result.validation_details, "FAIL");
        }
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_the_provider_named_scenario_file_from_the_scenarios_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kraken.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"[{
                "id": "s1",
                "name": "Get ticker",
                "environment": {"provider": "kraken", "network": "TESTNET"},
                "targetClass": "KrakenClient",
                "targetMethod": "getTicker",
                "expected": {"success": true},
                "tags": ["smoke"]
            }]"#,
        )
        .unwrap();

        let loader = ScenarioLoader::new(dir.path());
        let file = loader.load("kraken", "kraken.json");
        assert!(file.load_note.is_none());

        let selected = scenario_engine::loader::filter(&file, &["smoke".to_string()], false);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "s1");
    }
}
