//! Signed REST client for the trading and account endpoints that sit
//! alongside the WebSocket feeds. Kraken Futures signs every private
//! call; the session-level nonce discipline (strictly non-decreasing)
//! lives in [`wire_types::signing::NonceGenerator`].

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Method;
use thiserror::Error;
use tracing::warn;
use url::Url;

use wire_types::kraken::{RestEnvelope, REST_PATH_PREFIX};
use wire_types::signing::{rest_signature, NonceGenerator, SigningError};

#[derive(Debug, Error)]
pub enum RestError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("request rejected: {0:?}")]
    Rejected(Vec<String>),
    #[error("post-only retries exhausted after {0} attempts")]
    PostOnlyExhausted(u32),
}

pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    api_secret: String,
    nonce: Mutex<NonceGenerator>,
}

impl RestClient {
    fn build(base_url: Url, api_key: String, api_secret: String, timeout: Duration) -> Result<Self, RestError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
            nonce: Mutex::new(NonceGenerator::new()),
        })
    }

    /// 30s timeout, for order placement/cancellation.
    pub fn trading(base_url: Url, api_key: String, api_secret: String) -> Result<Self, RestError> {
        Self::build(base_url, api_key, api_secret, Duration::from_secs(30))
    }

    /// 10s timeout, for account/position reads.
    pub fn default_timeout(base_url: Url, api_key: String, api_secret: String) -> Result<Self, RestError> {
        Self::build(base_url, api_key, api_secret, Duration::from_secs(10))
    }

    fn next_nonce(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut nonce = self.nonce.lock().expect("nonce mutex poisoned");
        nonce.next(now).to_string()
    }

    /// Signs and sends a private call. `endpoint_path` is the path the
    /// signature covers (e.g. `/sendorder`), not including
    /// [`REST_PATH_PREFIX`]; `post_data` is the url-encoded body (or
    /// query string, for signed GETs).
    pub async fn call(&self, method: Method, endpoint_path: &str, post_data: &str) -> Result<RestEnvelope, RestError> {
        let nonce = self.next_nonce();
        let signature = rest_signature(&self.api_secret, post_data, &nonce, endpoint_path)?;

        let full_path = format!("{REST_PATH_PREFIX}{endpoint_path}");
        let url = self.base_url.join(&full_path).map_err(|_| {
            RestError::Rejected(vec![format!("invalid endpoint path: {endpoint_path}")])
        })?;

        let request = self
            .http
            .request(method.clone(), url)
            .header("APIKey", &self.api_key)
            .header("Nonce", &nonce)
            .header("Authent", &signature)
            .header("Content-Type", "application/x-www-form-urlencoded");

        // For GETs, `post_data` is the query string already embedded in
        // `endpoint_path` by the caller; it's only ever used here for the
        // signature. For everything else it's the literal request body.
        let request = if method == Method::GET {
            request
        } else {
            request.body(post_data.to_string())
        };

        let response = request.send().await?;
        let envelope: RestEnvelope = response.json().await?;
        if envelope.is_success() {
            Ok(envelope)
        } else {
            Err(RestError::Rejected(envelope.errors.clone()))
        }
    }
}

/// Codes a post-only order can be rejected with when it would have
/// crossed the book and taken liquidity instead of resting.
const POST_ONLY_REJECTION_CODES: &[&str] = &["postOnly", "wouldTakeLiquidity", "POST_ONLY_REJECT"];

fn is_post_only_rejection(errors: &[String]) -> bool {
    errors
        .iter()
        .any(|e| POST_ONLY_REJECTION_CODES.iter().any(|code| e.contains(code)))
}

/// Retries a post-only order placement closure up to `max_attempts`
/// times when the rejection reason is specifically a would-cross
/// rejection, backing off briefly between attempts so a fast-moving
/// book has a chance to settle. Any other rejection is returned
/// immediately without retrying.
pub async fn retry_post_only<F, Fut>(max_attempts: u32, mut place: F) -> Result<RestEnvelope, RestError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<RestEnvelope, RestError>>,
{
    for attempt in 0..max_attempts {
        match place(attempt).await {
            Ok(envelope) => return Ok(envelope),
            Err(RestError::Rejected(errors)) if is_post_only_rejection(&errors) => {
                warn!(attempt, ?errors, "post-only order would cross, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    Err(RestError::PostOnlyExhausted(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_post_only_rejection_codes() {
        assert!(is_post_only_rejection(&["postOnly would cross".to_string()]));
        assert!(!is_post_only_rejection(&["insufficientFunds".to_string()]));
    }

    #[tokio::test]
    async fn retry_post_only_stops_on_first_success() {
        let mut calls = 0;
        let result = retry_post_only(3, |_attempt| {
            calls += 1;
            async { Ok(RestEnvelope { result: Some(serde_json::json!("success")), errors: vec![], payload: serde_json::Value::Null }) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_post_only_gives_up_after_max_attempts() {
        let result = retry_post_only(2, |_attempt| async {
            Err(RestError::Rejected(vec!["postOnly would cross".to_string()]))
        })
        .await;
        assert!(matches!(result, Err(RestError::PostOnlyExhausted(2))));
    }

    #[tokio::test]
    async fn retry_post_only_does_not_retry_unrelated_rejections() {
        let mut calls = 0;
        let result = retry_post_only(3, |_attempt| {
            calls += 1;
            async { Err(RestError::Rejected(vec!["insufficientFunds".to_string()])) }
        })
        .await;
        assert!(matches!(result, Err(RestError::Rejected(_))));
        assert_eq!(calls, 1);
    }
}
