use std::time::Duration;

use thiserror::Error;

/// Cause-oriented failure taxonomy shared by every provider adapter.
///
/// The orchestrator routes on the kind alone; `detail` is for humans and
/// logs. All kinds are retryable through a different provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider answered but had nothing for this city.
    NotFound,
    /// 429-equivalent; carries a suggested back-off when the provider sent one.
    RateLimited,
    /// The call exceeded its deadline.
    Timeout,
    /// Any other 4xx/5xx.
    ApiError,
    /// Transport faults, malformed payloads, everything else.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ApiError => "api_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Tagged failure value returned by `Provider::search`.
///
/// Adapters translate their internal error types into this at the trait
/// boundary; the core never inspects provider-specific errors.
#[derive(Clone, Debug, Error)]
#[error("{kind}: {detail}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Suggested wait before the next call to this provider (429 responses).
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            detail: detail.into(),
            retry_after,
        }
    }

    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ApiError,
            detail: format!("status {}: {}", status, detail.into()),
            retry_after: None,
        }
    }
}

/// Maps a transport-level `reqwest` failure into the shared taxonomy.
pub fn classify_http_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        return ProviderError::new(ErrorKind::Timeout, e.to_string());
    }

    match e.status() {
        Some(s) if s.as_u16() == 429 => ProviderError::rate_limited(e.to_string(), None),
        Some(s) if s.as_u16() == 404 => ProviderError::new(ErrorKind::NotFound, e.to_string()),
        Some(s) => ProviderError::api(s.as_u16(), e.to_string()),
        None => ProviderError::new(ErrorKind::Unknown, e.to_string()),
    }
}
