//! C5: the per-scenario 11-step execution algorithm (§4.5).
//!
//! Single-threaded cooperative scheduling (§5): one logical task per
//! scenario, setup strictly sequential, event waiters awaited
//! concurrently with each other but never concurrently with another
//! scenario.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::context::Context;
use crate::event_source::EventSource;
use crate::registry::{ProviderConfig, Registry};
use crate::schema::{
    CleanupStep, EventResult, ExecutionResult, FieldValidation, Scenario, SetupStep, StepResult,
};
use crate::sentinel::{self, MarketData, Sentinel};

/// Substrings that mark an API key/secret as an unfilled template
/// rather than a real credential (§6's "obvious placeholder
/// substrings").
const PLACEHOLDER_MARKERS: &[&str] = &["your_", "xxx", "changeme", "placeholder", "replace_me", "<", "todo"];

const MIN_CREDENTIAL_LEN: usize = 8;

fn looks_like_placeholder(value: &str) -> bool {
    if value.trim().is_empty() || value.len() < MIN_CREDENTIAL_LEN {
        return true;
    }
    let lowered = value.to_ascii_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// §4.5 step 2 / §6: credentials are usable if the provider config
/// carries a real-looking key and secret, or well-known environment
/// variables do.
fn credentials_usable(config: &ProviderConfig, provider: &str) -> bool {
    let config_usable = !looks_like_placeholder(&config.api_key) && !looks_like_placeholder(&config.api_secret);
    if config_usable {
        return true;
    }
    let prefix = provider.to_ascii_uppercase();
    let env_key = std::env::var(format!("{prefix}_API_KEY")).unwrap_or_default();
    let env_secret = std::env::var(format!("{prefix}_API_SECRET")).unwrap_or_default();
    !looks_like_placeholder(&env_key) && !looks_like_placeholder(&env_secret)
}

/// Picks the instrument a sentinel's market-data lookup should use:
/// the first of the usual symbol-bearing keys present in the primary
/// parameter map.
fn instrument_of(params: &crate::schema::ParamMap) -> Option<String> {
    for key in ["symbol", "productId", "instrument", "product_id"] {
        if let Some(value) = params.get(key).and_then(|v| v.as_str()) {
            return Some(value.to_string());
        }
    }
    None
}

pub struct Orchestrator {
    registry: Registry,
    provider_config: ProviderConfig,
    provider_name: String,
    market: Arc<dyn MarketData>,
    event_source: Arc<dyn EventSource>,
    context: Context,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        provider_config: ProviderConfig,
        provider_name: impl Into<String>,
        market: Arc<dyn MarketData>,
        event_source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            registry,
            provider_config,
            provider_name: provider_name.into(),
            market,
            event_source,
            context: Context::new(),
        }
    }

    pub async fn run(&mut self, scenario: &Scenario) -> ExecutionResult {
        let started = Instant::now();

        // 1. Reset context.
        self.context.clear();

        // 2. Skip gates.
        if !scenario.enabled {
            return ExecutionResult::skipped(scenario, "Skipped (disabled)");
        }
        if scenario.environment.requires_live_connection && !credentials_usable(&self.provider_config, &self.provider_name) {
            return ExecutionResult::skipped(scenario, "Skipped (no credentials)");
        }

        // 3. Setup steps.
        let mut setup_results = Vec::new();
        if let Some(failure) = self.run_setup(scenario, &mut setup_results).await {
            return ExecutionResult {
                scenario_id: scenario.id.clone(),
                scenario_name: scenario.name.clone(),
                passed: false,
                error: Some(failure),
                setup_results,
                elapsed: started.elapsed(),
                ..Default::default()
            };
        }

        // 4. Activate event source.
        let event_source_active = scenario.event_source.is_some();
        if let Some(descriptor) = &scenario.event_source {
            if let Err(err) = self.event_source.activate(&descriptor.class, &descriptor.params).await {
                warn!(scenario = %scenario.id, error = %err, "event source activation failed, waiters will time out");
            }
        }

        // 5. Register event waiters (awaited concurrently in step 8).
        // 6. Dynamic parameter resolution.
        let mut params = scenario.input.params.clone();
        if let Err(err) = self.resolve_sentinels(&mut params).await {
            if event_source_active {
                self.deactivate_event_source(scenario).await;
            }
            return ExecutionResult {
                scenario_id: scenario.id.clone(),
                scenario_name: scenario.name.clone(),
                passed: false,
                error: Some(err),
                setup_results,
                elapsed: started.elapsed(),
                ..Default::default()
            };
        }

        // 7. Dispatch primary method.
        let invoke_result = self
            .registry
            .invoke_method(&scenario.target_class, &scenario.target_method, &params, &self.provider_config)
            .await;

        // 8. Await all event waiters.
        let event_results = self.await_events(scenario).await;

        let (actual, invoke_error) = match invoke_result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err.to_string())),
        };

        // 9. Validate.
        let mut validation_details = validate(scenario, actual.as_ref(), invoke_error.as_deref());
        for event in &event_results {
            if !event.received {
                if let Some(expected) = scenario.expected.events.iter().find(|e| e.name == event.name) {
                    if expected.required {
                        validation_details.push(FieldValidation {
                            field: format!("event:{}", event.name),
                            expected: serde_json::Value::Bool(true),
                            actual: Some(serde_json::Value::Bool(false)),
                            passed: false,
                            message: Some(format!("required event `{}` timed out", event.name)),
                        });
                    }
                }
            }
        }
        let passed = validation_details.iter().all(|d| d.passed);

        // 10. Cleanup steps.
        let cleanup_results = self.run_cleanup(scenario).await;

        // 11. Deactivate event source.
        if event_source_active {
            self.deactivate_event_source(scenario).await;
        }

        let rate_limit = actual.as_ref().and_then(extract_rate_limit);

        ExecutionResult {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            passed,
            actual,
            error: invoke_error,
            elapsed: started.elapsed(),
            validation_details,
            setup_results,
            cleanup_results,
            event_results,
            rate_limit,
        }
    }

    async fn run_setup(&mut self, scenario: &Scenario, results: &mut Vec<StepResult>) -> Option<String> {
        for step in &scenario.setup {
            let outcome = self.run_one_setup_step(step).await;
            match outcome {
                Ok(()) => results.push(StepResult { id: step.id.clone(), passed: true, error: None }),
                Err(err) => {
                    results.push(StepResult { id: step.id.clone(), passed: false, error: Some(err.clone()) });
                    if step.required {
                        return Some(format!("required setup step `{}` failed: {err}", step.id));
                    }
                }
            }
        }
        None
    }

    async fn run_one_setup_step(&mut self, step: &SetupStep) -> Result<(), String> {
        let mut params = step.params.clone();
        self.resolve_context_references(&mut params)?;
        let result = self
            .registry
            .invoke_method(&step.target_class, &step.target_method, &params, &self.provider_config)
            .await
            .map_err(|err| err.to_string())?;
        if let Some(key) = &step.store_result_as {
            let stored = result.get("data").cloned().unwrap_or(result);
            self.context.set(key.clone(), stored);
        }
        Ok(())
    }

    fn resolve_context_references(&self, params: &mut crate::schema::ParamMap) -> Result<(), String> {
        for value in params.values_mut() {
            if let serde_json::Value::String(raw) = value {
                if raw.starts_with('$') {
                    *value = self.context.resolve(raw).map_err(|err| err.to_string())?;
                }
            }
        }
        Ok(())
    }

    async fn resolve_sentinels(&self, params: &mut crate::schema::ParamMap) -> Result<(), String> {
        let instrument = instrument_of(params).unwrap_or_default();
        let keys: Vec<String> = params.keys().cloned().collect();
        for key in keys {
            let raw = match params.get(&key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => continue,
            };
            if let Some(sentinel) = Sentinel::parse(&raw) {
                let resolved = sentinel::resolve(sentinel, &instrument, self.market.as_ref())
                    .await
                    .map_err(|err| format!("failed to resolve `{raw}`: {err}"))?;
                params.insert(key, resolved);
            } else if raw.starts_with('$') {
                let resolved = self.context.resolve(&raw).map_err(|err| err.to_string())?;
                params.insert(key, resolved);
            }
        }
        Ok(())
    }

    async fn await_events(&self, scenario: &Scenario) -> Vec<EventResult> {
        let waiters = scenario.expected.events.iter().map(|expected| {
            let event_source = self.event_source.clone();
            let name = expected.name.clone();
            let timeout_ms = expected.timeout_ms;
            async move {
                let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), event_source.wait_for(&name, timeout_ms)).await;
                match outcome {
                    Ok(Ok(occurrence)) => EventResult { name, received: true, captured: Some(occurrence.payload), timeout_ms },
                    _ => EventResult { name, received: false, captured: None, timeout_ms },
                }
            }
        });
        futures_util::future::join_all(waiters).await
    }

    async fn run_cleanup(&mut self, scenario: &Scenario) -> Vec<StepResult> {
        let mut results = Vec::new();
        for step in &scenario.cleanup {
            let outcome = self.run_one_cleanup_step(step).await;
            let passed = outcome.is_ok();
            results.push(StepResult { id: step.id.clone(), passed, error: outcome.err() });
            if !passed && !step.continue_on_error {
                break;
            }
        }
        results
    }

    async fn run_one_cleanup_step(&mut self, step: &CleanupStep) -> Result<(), String> {
        let mut params = step.params.clone();
        self.resolve_context_references(&mut params)?;
        self.registry
            .invoke_method(&step.target_class, &step.target_method, &params, &self.provider_config)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    async fn deactivate_event_source(&self, scenario: &Scenario) {
        if let Some(descriptor) = &scenario.event_source {
            if let Err(err) = self.event_source.deactivate(&descriptor.class, &descriptor.params).await {
                warn!(scenario = %scenario.id, error = %err, "event source deactivation failed");
            }
        }
        info!(scenario = %scenario.id, "event source deactivated");
    }
}

fn validate(scenario: &Scenario, actual: Option<&serde_json::Value>, invoke_error: Option<&str>) -> Vec<FieldValidation> {
    let expected = &scenario.expected;
    let mut details = Vec::new();

    let actual_success = match actual {
        Some(value) => is_success(value),
        None => false,
    };

    if let (Some(error), false, Some(error_code)) = (invoke_error, expected.success, &expected.error_code) {
        let matches_code = error.contains(error_code.as_str());
        let matches_message = expected
            .error_message
            .as_ref()
            .map(|message| error.contains(message.as_str()))
            .unwrap_or(true);
        details.push(FieldValidation {
            field: "errorCode".to_string(),
            expected: serde_json::json!(error_code),
            actual: Some(serde_json::json!(error)),
            passed: matches_code && matches_message,
            message: if matches_code && matches_message {
                None
            } else {
                Some(format!("error `{error}` did not match expected code `{error_code}`"))
            },
        });
        return details;
    }

    // The error text to match `allowErrorCodes` against may come from a
    // thrown error, or from a non-thrown actual value whose own shape
    // says it failed (`{success: false, errors: [...]}`).
    let error_text = invoke_error.map(str::to_string).or_else(|| {
        actual.filter(|_| !actual_success).map(|value| {
            value
                .get("errorCode")
                .or_else(|| value.get("error"))
                .or_else(|| value.get("errors"))
                .cloned()
                .unwrap_or(serde_json::Value::Null)
                .to_string()
        })
    });
    let allow_listed = error_text
        .map(|error| expected.allow_error_codes.iter().any(|code| error.contains(code.as_str())))
        .unwrap_or(false);
    let effective_success = actual_success || allow_listed;

    details.push(FieldValidation {
        field: "success".to_string(),
        expected: serde_json::json!(expected.success),
        actual: Some(serde_json::json!(effective_success)),
        passed: effective_success == expected.success,
        message: None,
    });

    if let Some(actual) = actual {
        for (key, expected_value) in &expected.result_data {
            let actual_value = actual
                .get("data")
                .and_then(|data| data.get(key))
                .or_else(|| actual.get(key));
            let passed = match actual_value {
                Some(found) => values_match(expected_value, found, scenario.validation.numeric_tolerance),
                None => false,
            };
            details.push(FieldValidation {
                field: key.clone(),
                expected: expected_value.clone(),
                actual: actual_value.cloned(),
                passed,
                message: if passed { None } else { Some(format!("field `{key}` did not match")) },
            });
        }
    }

    details
}

// §4.5's validation rules read as three independent checks joined by
// OR, but a literal OR would let an explicit `success: false` be
// overridden by "no `error` key" on any shape that doesn't carry one.
// Each field is authoritative when present; "no error key" is only
// consulted as a fallback for shapes that have neither.
fn is_success(value: &serde_json::Value) -> bool {
    if let Some(success) = value.get("success").and_then(|v| v.as_bool()) {
        return success;
    }
    if let Some(success) = value.get("isSuccess").and_then(|v| v.as_bool()) {
        return success;
    }
    value.get("error").is_none()
}

fn values_match(expected: &serde_json::Value, actual: &serde_json::Value, tolerance: f64) -> bool {
    if expected == actual {
        return true;
    }
    if let (Some(e), Some(a)) = (as_number(expected), as_number(actual)) {
        return (e - a).abs() < tolerance;
    }
    serde_json::to_string(expected).unwrap_or_default() == serde_json::to_string(actual).unwrap_or_default()
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
}

fn extract_rate_limit(actual: &serde_json::Value) -> Option<crate::schema::RateLimitSnapshot> {
    let source = actual.get("rateLimit").or_else(|| actual.get("rate_limit"))?;
    serde_json::from_value(source.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BuiltInstance, ClassFactory, DispatchArgs};
    use crate::schema::{EnvironmentDescriptor, ExpectedEvent, ExpectedResult, Network, ParamMap, ScenarioInput, ValidationConfig};
    use crate::sentinel::MarketDataError;
    use crate::testing::{ScriptedClient, ScriptedEventSource};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct FixedMarket;

    #[async_trait]
    impl MarketData for FixedMarket {
        async fn bid(&self, _instrument: &str) -> Result<f64, MarketDataError> {
            Ok(100.0)
        }
        async fn ask(&self, _instrument: &str) -> Result<f64, MarketDataError> {
            Ok(101.0)
        }
        async fn last(&self, _instrument: &str) -> Result<f64, MarketDataError> {
            Ok(100.5)
        }
    }

    fn base_scenario(expected: ExpectedResult) -> Scenario {
        Scenario {
            id: "s1".to_string(),
            name: "Get ticker".to_string(),
            description: String::new(),
            category: None,
            tags: vec![],
            enabled: true,
            environment: EnvironmentDescriptor {
                provider: "kraken".to_string(),
                network: Network::Testnet,
                requires_auth: false,
                requires_live_connection: false,
                credential_reference: None,
            },
            target_class: "KrakenClient".to_string(),
            target_method: "getTicker".to_string(),
            input: ScenarioInput { params: ParamMap::new(), mock_data: None, time_series: None },
            expected,
            validation: ValidationConfig::default(),
            setup: vec![],
            cleanup: vec![],
            event_source: None,
        }
    }

    fn orchestrator_with_response(response: serde_json::Value) -> Orchestrator {
        orchestrator_with_response_and_events(response, Arc::new(ScriptedEventSource::new()))
    }

    fn orchestrator_with_response_and_events(
        response: serde_json::Value,
        event_source: Arc<ScriptedEventSource>,
    ) -> Orchestrator {
        let mut registry = Registry::new();
        registry.register(ClassFactory {
            class_name: "KrakenClient".to_string(),
            dependencies: vec![],
            build: Arc::new(move |_config, _deps| {
                Arc::new(ScriptedClient::new().on("getTicker", {
                    let response = response.clone();
                    move |_args| Ok(response.clone())
                })) as BuiltInstance
            }),
        });
        Orchestrator::new(registry, ProviderConfig::default(), "kraken", Arc::new(FixedMarket), event_source)
    }

    #[tokio::test]
    async fn allow_listed_error_code_on_a_non_thrown_failure_counts_as_success() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": false, "errorCode": "ALREADY"}));
        let scenario = base_scenario(ExpectedResult {
            success: true,
            allow_error_codes: vec!["ALREADY".to_string()],
            ..Default::default()
        });
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn disabled_scenario_is_skipped() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true}));
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.enabled = false;
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
        assert!(result.validation_details[0].message.as_ref().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn requires_live_connection_without_credentials_is_skipped() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true}));
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.environment.requires_live_connection = true;
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
        assert!(result.validation_details[0].message.as_ref().unwrap().contains("no credentials"));
    }

    #[tokio::test]
    async fn successful_dispatch_passes_validation() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true}));
        let scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn result_data_mismatch_fails_validation() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true, "data": {"price": "99.00"}}));
        let mut result_data = ParamMap::new();
        result_data.insert("price".to_string(), serde_json::json!("100.00"));
        let scenario = base_scenario(ExpectedResult { success: true, result_data, ..Default::default() });
        let result = orchestrator.run(&scenario).await;
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn numeric_tolerance_allows_near_equal_values() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true, "data": {"price": 100.00005}}));
        let mut result_data = ParamMap::new();
        result_data.insert("price".to_string(), serde_json::json!(100.0));
        let scenario = base_scenario(ExpectedResult { success: true, result_data, ..Default::default() });
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn required_event_timeout_fails_scenario() {
        let mut orchestrator = orchestrator_with_response(serde_json::json!({"success": true}));
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.expected.events.push(ExpectedEvent { name: "orderUpdate".to_string(), required: true, timeout_ms: 10, ..Default::default() });
        let result = orchestrator.run(&scenario).await;
        assert!(!result.passed);
        assert!(result.event_results.iter().any(|e| e.name == "orderUpdate" && !e.received));
    }

    #[tokio::test]
    async fn required_event_is_resolved_from_the_event_source() {
        let events = Arc::new(ScriptedEventSource::new());
        events.push("orderUpdate", serde_json::json!({"status": "filled"}));
        let mut orchestrator = orchestrator_with_response_and_events(serde_json::json!({"success": true}), events.clone());
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.event_source = Some(crate::schema::EventSourceDescriptor { class: "KrakenFeed".to_string(), params: ParamMap::new() });
        scenario.expected.events.push(ExpectedEvent { name: "orderUpdate".to_string(), required: true, timeout_ms: 1_000, ..Default::default() });
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
        assert!(result.event_results.iter().any(|e| e.name == "orderUpdate" && e.received));
        assert_eq!(events.activation_calls(), vec!["KrakenFeed".to_string()]);
    }

    #[tokio::test]
    async fn sentinel_is_resolved_before_dispatch() {
        let seen: Arc<std::sync::Mutex<Option<serde_json::Value>>> = Arc::new(std::sync::Mutex::new(None));
        let mut registry = Registry::new();
        registry.register(ClassFactory {
            class_name: "KrakenClient".to_string(),
            dependencies: vec![],
            build: Arc::new({
                let seen = seen.clone();
                move |_config, _deps| {
                    let seen = seen.clone();
                    Arc::new(ScriptedClient::new().on("placeOrder", move |args| {
                        if let DispatchArgs::Object(map) = &args {
                            *seen.lock().unwrap() = map.get("price").cloned();
                        }
                        Ok(serde_json::json!({"success": true}))
                    })) as BuiltInstance
                }
            }),
        });
        let mut orchestrator = Orchestrator::new(
            registry,
            ProviderConfig::default(),
            "kraken",
            Arc::new(FixedMarket),
            Arc::new(ScriptedEventSource::new()),
        );
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.input.params.insert("symbol".to_string(), serde_json::json!("PI_XBTUSD"));
        scenario.input.params.insert("price".to_string(), serde_json::json!("$DYNAMIC_LIMIT_BUY"));
        let result = orchestrator.run(&scenario).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn required_setup_failure_aborts_with_setup_results_attached() {
        let mut registry = Registry::new();
        registry.register(ClassFactory {
            class_name: "KrakenClient".to_string(),
            dependencies: vec![],
            build: Arc::new(|_config, _deps| {
                Arc::new(ScriptedClient::new().on("openAccount", |_args| Err(anyhow::anyhow!("boom")))) as BuiltInstance
            }),
        });
        let mut orchestrator = Orchestrator::new(
            registry,
            ProviderConfig::default(),
            "kraken",
            Arc::new(FixedMarket),
            Arc::new(ScriptedEventSource::new()),
        );
        let mut scenario = base_scenario(ExpectedResult { success: true, ..Default::default() });
        scenario.setup.push(SetupStep {
            id: "setup1".to_string(),
            description: String::new(),
            target_class: "KrakenClient".to_string(),
            target_method: "openAccount".to_string(),
            params: ParamMap::new(),
            required: true,
            store_result_as: None,
        });
        let result = orchestrator.run(&scenario).await;
        assert!(!result.passed);
        assert_eq!(result.setup_results.len(), 1);
        assert!(!result.setup_results[0].passed);
    }

    #[test]
    fn placeholder_credentials_are_not_usable() {
        let config = ProviderConfig { api_key: "your_api_key_here".to_string(), api_secret: "s".repeat(20), ..Default::default() };
        assert!(!credentials_usable(&config, "kraken"));
    }

    #[test]
    fn real_looking_credentials_are_usable() {
        let config = ProviderConfig { api_key: "abcdef1234567890".to_string(), api_secret: "zyxwvutsrqponmlk".to_string(), ..Default::default() };
        assert!(credentials_usable(&config, "kraken"));
    }
}
