//! Test doubles shared across `scenario-engine`'s own tests and
//! downstream crates (`scenario-cli`) that need an `EventSource` or
//! `Invokable` without a live `ws-session` connection.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::event_source::{EventOccurrence, EventSource, EventSourceError};
use crate::registry::{DispatchArgs, Invokable};
use crate::schema::ParamMap;

/// An [`EventSource`] whose queued occurrences are handed out in
/// order, one per `wait_for` call, regardless of the name requested.
#[derive(Default)]
pub struct ScriptedEventSource {
    queue: Mutex<VecDeque<EventOccurrence>>,
    activation_calls: Mutex<Vec<String>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: impl Into<String>, payload: serde_json::Value) {
        self.queue.lock().unwrap().push_back(EventOccurrence { name: name.into(), payload });
    }

    pub fn activation_calls(&self) -> Vec<String> {
        self.activation_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn activate(&self, class: &str, _params: &ParamMap) -> Result<(), EventSourceError> {
        self.activation_calls.lock().unwrap().push(class.to_string());
        Ok(())
    }

    async fn deactivate(&self, _class: &str, _params: &ParamMap) -> Result<(), EventSourceError> {
        Ok(())
    }

    async fn wait_for(&self, name: &str, _timeout_ms: u64) -> Result<EventOccurrence, EventSourceError> {
        match self.queue.lock().unwrap().pop_front() {
            Some(occurrence) => Ok(occurrence),
            None => Err(EventSourceError::Timeout(name.to_string())),
        }
    }
}

/// An [`Invokable`] whose methods are closures registered ahead of
/// time, keyed by method name, so a test can script a provider
/// client's responses without a real network call.
pub struct ScriptedClient {
    handlers: std::collections::HashMap<&'static str, Box<dyn Fn(DispatchArgs) -> Result<serde_json::Value, anyhow::Error> + Send + Sync>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self { handlers: std::collections::HashMap::new() }
    }

    pub fn on(mut self, method: &'static str, handler: impl Fn(DispatchArgs) -> Result<serde_json::Value, anyhow::Error> + Send + Sync + 'static) -> Self {
        self.handlers.insert(method, Box::new(handler));
        self
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Invokable for ScriptedClient {
    fn methods(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    fn param_count(&self, method: &str) -> Option<usize> {
        self.handlers.contains_key(method).then_some(1)
    }

    async fn invoke(&self, method: &str, args: DispatchArgs) -> Result<serde_json::Value, anyhow::Error> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| anyhow::anyhow!("no scripted handler for `{method}`"))?;
        handler(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_event_source_hands_out_queued_occurrences_in_order() {
        let source = ScriptedEventSource::new();
        source.push("orderUpdate", serde_json::json!({"status": "filled"}));
        let occurrence = source.wait_for("orderUpdate", 5_000).await.unwrap();
        assert_eq!(occurrence.payload["status"], "filled");
        assert!(source.wait_for("orderUpdate", 5_000).await.is_err());
    }

    #[tokio::test]
    async fn scripted_client_dispatches_to_registered_handler() {
        let client = ScriptedClient::new().on("getTicker", |_args| Ok(serde_json::json!({"success": true})));
        let result = client.invoke("getTicker", DispatchArgs::None).await.unwrap();
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn scripted_client_missing_handler_is_an_error() {
        let client = ScriptedClient::new();
        assert!(client.invoke("ghost", DispatchArgs::None).await.is_err());
    }
}
