//! C6: the fixed outcome-status taxonomy providers map their raw
//! errors onto, per §4.6.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Unauthorized,
    RateLimited,
    Timeout,
    ServiceUnavailable,
    NotFound,
    Already,
    BadParameters,
    BadPrerequisites,
    NoConnection,
    Unexpected,
    Failure,
}

impl OutcomeStatus {
    /// §4.6: retryable statuses are exactly the transient ones —
    /// timeouts, rate limits, upstream unavailability, and connection
    /// loss. Authorization and validation failures are never retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServiceUnavailable | Self::NoConnection
        )
    }

    /// Classifies an HTTP status code plus an optional provider error
    /// code string into the fixed taxonomy. Providers that don't supply
    /// an error code (a bare HTTP failure) still get a best-effort
    /// mapping from the status code alone.
    pub fn from_http(status: u16, provider_code: Option<&str>) -> Self {
        if let Some(code) = provider_code {
            if let Ok(numeric) = code.parse::<i64>() {
                if let Some(mapped) = Self::from_provider_code_numeric(numeric) {
                    return mapped;
                }
            }
            if let Some(mapped) = Self::from_provider_code(code) {
                return mapped;
            }
        }
        match status {
            200..=299 => Self::Success,
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Already,
            422 => Self::BadParameters,
            425 | 428 => Self::BadPrerequisites,
            429 => Self::RateLimited,
            500..=503 => Self::ServiceUnavailable,
            _ => Self::Unexpected,
        }
    }

    /// Provider-specific error-code substrings that disambiguate beyond
    /// what the HTTP status alone says (e.g. Kraken's `EOrder:` /
    /// Binance's `-20xx` families both collapse onto the same taxonomy).
    fn from_provider_code(code: &str) -> Option<Self> {
        let lowered = code.to_ascii_lowercase();
        if lowered.contains("permission") || lowered.contains("invalidkey") || lowered.contains("signature") {
            return Some(Self::Unauthorized);
        }
        if lowered.contains("ratelimit") || lowered.contains("toomanyrequests") {
            return Some(Self::RateLimited);
        }
        if lowered.contains("timeout") {
            return Some(Self::Timeout);
        }
        if lowered.contains("unavailable") || lowered.contains("busy") || lowered.contains("maintenance") {
            return Some(Self::ServiceUnavailable);
        }
        if lowered.contains("unknownorder") || lowered.contains("notfound") {
            return Some(Self::NotFound);
        }
        if lowered.contains("alreadyexists") || lowered.contains("duplicate") {
            return Some(Self::Already);
        }
        if lowered.contains("invalidarg") || lowered.contains("badparam") || lowered.contains("insufficientfunds") {
            return Some(Self::BadParameters);
        }
        if lowered.contains("precondition") || lowered.contains("prerequisite") {
            return Some(Self::BadPrerequisites);
        }
        None
    }

    /// Classifies a numeric provider error code (Binance-style signed
    /// integers). The validation ranges `[-1199, -1100]` and
    /// `[-4199, -4000]` both denote malformed or out-of-range request
    /// parameters.
    fn from_provider_code_numeric(code: i64) -> Option<Self> {
        if (-1199..=-1100).contains(&code) || (-4199..=-4000).contains(&code) {
            return Some(Self::BadParameters);
        }
        None
    }

    /// Classifies a local transport/connection failure that never
    /// reached the provider as a wire-level response.
    pub fn from_connection_error() -> Self {
        Self::NoConnection
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::NotFound => "NOT_FOUND",
            Self::Already => "ALREADY",
            Self::BadParameters => "BAD_PARAMETERS",
            Self::BadPrerequisites => "BAD_PREREQUISITES",
            Self::NoConnection => "NO_CONNECTION",
            Self::Unexpected => "UNEXPECTED",
            Self::Failure => "FAILURE",
        };
        f.write_str(name)
    }
}
