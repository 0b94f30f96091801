//! Trait boundary between the orchestrator and a live provider feed.
//!
//! `scenario-engine` never depends on `ws-session` directly (per the
//! crate layout's separation of the reflection/orchestration engine
//! from the wire protocol); a provider binary wires a `ws-session`
//! session into this trait and hands the trait object to the
//! orchestrator instead.

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::ParamMap;

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("event source activation failed: {0}")]
    ActivationFailed(String),
    #[error("event source deactivation failed: {0}")]
    DeactivationFailed(String),
    #[error("wait for event `{0}` timed out")]
    Timeout(String),
}

/// One occurrence of a named event captured while a waiter was armed.
#[derive(Debug, Clone)]
pub struct EventOccurrence {
    pub name: String,
    pub payload: serde_json::Value,
}

/// A live feed a scenario can subscribe to and wait on (§4.5 steps
/// 4/5/11). Implementations typically wrap a `ws-session` subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Activates whatever subscription `params` describes. Activation
    /// failures are logged by the caller and do not fail the scenario
    /// (§4.5 step 4) — the event waiters below simply time out instead.
    async fn activate(&self, class: &str, params: &ParamMap) -> Result<(), EventSourceError>;

    /// Deactivates the subscription made by `activate`. Always called
    /// during scenario teardown, including after a failed activation.
    async fn deactivate(&self, class: &str, params: &ParamMap) -> Result<(), EventSourceError>;

    /// Waits up to `timeout_ms` for an event named `name` to arrive,
    /// returning its payload. Times out with [`EventSourceError::Timeout`].
    async fn wait_for(&self, name: &str, timeout_ms: u64) -> Result<EventOccurrence, EventSourceError>;
}

/// An [`EventSource`] that is never configured: used when a scenario
/// declares no `eventSource` so the orchestrator has a uniform type to
/// hold without an `Option<Box<dyn EventSource>>` at every call site.
pub struct NullEventSource;

#[async_trait]
impl EventSource for NullEventSource {
    async fn activate(&self, _class: &str, _params: &ParamMap) -> Result<(), EventSourceError> {
        Ok(())
    }

    async fn deactivate(&self, _class: &str, _params: &ParamMap) -> Result<(), EventSourceError> {
        Ok(())
    }

    async fn wait_for(&self, name: &str, _timeout_ms: u64) -> Result<EventOccurrence, EventSourceError> {
        Err(EventSourceError::Timeout(name.to_string()))
    }
}
