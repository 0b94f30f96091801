//! C1: immutable value types describing scenarios, steps, expectations,
//! and event sources. Unknown JSON fields are ignored on load (forward
//! compatibility); the loader is responsible for rejecting files missing
//! the required fields named below.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Preserves the declaration order of a scenario file's JSON object so
/// positional dispatch (`registry::resolve_dispatch_args`) can pass
/// values in insertion order; a `HashMap` would randomize it per
/// process.
pub type ParamMap = IndexMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDescriptor {
    pub provider: String,
    pub network: Network,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub requires_live_connection: bool,
    #[serde(default)]
    pub credential_reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MockDataDescriptor {
    #[serde(flatten)]
    pub fields: ParamMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioInput {
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub mock_data: Option<MockDataDescriptor>,
    #[serde(default)]
    pub time_series: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedEvent {
    pub name: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_event_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_event_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedResult {
    pub success: bool,
    #[serde(default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub result_data: ParamMap,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub events: Vec<ExpectedEvent>,
    #[serde(default)]
    pub allow_error_codes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ValidationConfig {
    #[serde(default = "default_tolerance")]
    pub numeric_tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.0001
}

impl Default for ExpectedEvent {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: None,
            required: false,
            timeout_ms: default_event_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStep {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub target_class: String,
    pub target_method: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub store_result_as: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStep {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub target_class: String,
    pub target_method: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceDescriptor {
    pub class: String,
    #[serde(default)]
    pub params: ParamMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub environment: EnvironmentDescriptor,
    pub target_class: String,
    pub target_method: String,
    #[serde(default)]
    pub input: ScenarioInput,
    pub expected: ExpectedResult,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub setup: Vec<SetupStep>,
    #[serde(default)]
    pub cleanup: Vec<CleanupStep>,
    #[serde(default)]
    pub event_source: Option<EventSourceDescriptor>,
}

impl Default for ScenarioInput {
    fn default() -> Self {
        Self {
            params: ParamMap::new(),
            mock_data: None,
            time_series: None,
        }
    }
}

/// A rate-limit snapshot lifted out of a provider response, per the
/// GLOSSARY's `{usedWeight, maxWeight, orderCount?, maxOrders?}` shape.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RateLimitSnapshot {
    pub used_weight: Option<u64>,
    pub max_weight: Option<u64>,
    pub order_count: Option<u64>,
    pub max_orders: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidation {
    pub field: String,
    pub expected: serde_json::Value,
    pub actual: Option<serde_json::Value>,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventResult {
    pub name: String,
    pub received: bool,
    pub captured: Option<serde_json::Value>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub id: String,
    pub passed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub passed: bool,
    pub actual: Option<serde_json::Value>,
    pub error: Option<String>,
    pub elapsed: std::time::Duration,
    pub validation_details: Vec<FieldValidation>,
    pub setup_results: Vec<StepResult>,
    pub cleanup_results: Vec<StepResult>,
    pub event_results: Vec<EventResult>,
    pub rate_limit: Option<RateLimitSnapshot>,
}

impl ExecutionResult {
    pub fn skipped(scenario: &Scenario, reason: &str) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            passed: true,
            validation_details: vec![FieldValidation {
                field: "skip".to_string(),
                expected: serde_json::Value::Bool(true),
                actual: None,
                passed: true,
                message: Some(reason.to_string()),
            }],
            ..Default::default()
        }
    }
}
