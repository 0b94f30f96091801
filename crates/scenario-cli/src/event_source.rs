//! [`EventSource`] backed by a live `ws-session` subscription. A
//! scenario's `eventSource.class` names the feed to subscribe to
//! (e.g. `open_orders`); `params.productId` narrows it to one
//! instrument when the feed takes a product filter.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Duration;

use scenario_engine::event_source::{EventOccurrence, EventSource, EventSourceError};
use scenario_engine::ParamMap;
use ws_session::{CallbackHandle, SessionHandle};

pub struct WsEventSource {
    session: SessionHandle,
    active: Mutex<Option<CallbackHandle>>,
}

impl WsEventSource {
    pub fn new(session: SessionHandle) -> Self {
        Self { session, active: Mutex::new(None) }
    }

    fn product_of(params: &ParamMap) -> Option<String> {
        params
            .get("productId")
            .or_else(|| params.get("symbol"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn activate(&self, class: &str, params: &ParamMap) -> Result<(), EventSourceError> {
        let handle = self
            .session
            .subscribe(class.to_string(), Self::product_of(params))
            .await
            .map_err(|err| EventSourceError::ActivationFailed(err.to_string()))?;
        *self.active.lock().await = Some(handle);
        Ok(())
    }

    async fn deactivate(&self, _class: &str, _params: &ParamMap) -> Result<(), EventSourceError> {
        if let Some(handle) = self.active.lock().await.take() {
            handle.unsubscribe();
        }
        Ok(())
    }

    async fn wait_for(&self, name: &str, timeout_ms: u64) -> Result<EventOccurrence, EventSourceError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(EventSourceError::Timeout(name.to_string()));
            }
            let mut guard = self.active.lock().await;
            let Some(handle) = guard.as_mut() else {
                return Err(EventSourceError::Timeout(name.to_string()));
            };
            match tokio::time::timeout(remaining, handle.recv()).await {
                Ok(Some(event)) if event.feed == name => {
                    return Ok(EventOccurrence { name: event.feed, payload: event.payload });
                }
                Ok(Some(_other_feed_event)) => continue,
                Ok(None) | Err(_) => return Err(EventSourceError::Timeout(name.to_string())),
            }
        }
    }
}
