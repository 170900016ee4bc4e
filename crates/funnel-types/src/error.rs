//! Typed error model for stage adapters.
//!
//! Adapters construct an [`AdapterError`] through one of the kind-specific
//! factories. Retry decisions dispatch on [`ErrorKind`], never on message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upstream asked us to slow down (retryable).
    RateLimited,
    /// Timeouts, connection resets, 5xx (retryable).
    Transient,
    /// Bad credentials, malformed filters, 4xx (not retryable).
    Permanent,
    /// A circuit breaker rejected the call without contacting the service.
    CircuitOpen,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::CircuitOpen => "circuit_open",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Multi-second retry.
    Slow,
}

/// Structured error from an adapter or an external call it makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {service}/{code}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    /// External service the error came from (`"insightiq"`, `"openai"`).
    pub service: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
}

impl AdapterError {
    fn new(
        kind: ErrorKind,
        backoff_class: BackoffClass,
        service: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            service: service.into(),
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
            backoff_class,
        }
    }

    /// Rate limit (retryable, slow backoff unless a hint is given).
    #[must_use]
    pub fn rate_limited(
        service: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimited,
            BackoffClass::Slow,
            service,
            "RATE_LIMITED",
            message,
        );
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient upstream failure (retryable, normal backoff).
    #[must_use]
    pub fn transient(
        service: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Transient, BackoffClass::Normal, service, code, message)
    }

    /// Unrecoverable failure (not retryable).
    #[must_use]
    pub fn permanent(
        service: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Permanent, BackoffClass::Normal, service, code, message)
    }

    /// Rejected by an open circuit breaker.
    #[must_use]
    pub fn circuit_open(service: impl Into<String>, retry_after_ms: u64) -> Self {
        let service = service.into();
        let message = format!(
            "circuit breaker for '{service}' is open, retry in {}s",
            retry_after_ms.div_ceil(1000)
        );
        let mut err = Self::new(
            ErrorKind::CircuitOpen,
            BackoffClass::Slow,
            service,
            "CIRCUIT_OPEN",
            message,
        );
        err.retry_after_ms = Some(retry_after_ms);
        err
    }

    /// Only rate limits and transient failures are worth retrying in place.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimited | ErrorKind::Transient)
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(AdapterError::rate_limited("openai", "429", None).is_retryable());
        assert!(AdapterError::transient("insightiq", "TIMEOUT", "timed out").is_retryable());
        assert!(!AdapterError::permanent("hubspot", "AUTH", "bad key").is_retryable());
        assert!(!AdapterError::circuit_open("apify", 30_000).is_retryable());
    }

    #[test]
    fn circuit_open_carries_retry_after() {
        let err = AdapterError::circuit_open("apify", 1_500);
        assert!(err.is_circuit_open());
        assert_eq!(err.retry_after_ms, Some(1_500));
        assert!(err.message.contains("retry in 2s"), "got: {}", err.message);
    }

    #[test]
    fn display_format() {
        let err = AdapterError::permanent("hubspot", "AUTH", "missing api key");
        assert_eq!(err.to_string(), "[permanent] hubspot/AUTH: missing api key");
    }

    #[test]
    fn rate_limit_uses_slow_backoff() {
        let err = AdapterError::rate_limited("openai", "slow down", Some(2_000));
        assert_eq!(err.backoff_class, BackoffClass::Slow);
        assert_eq!(err.retry_after_ms, Some(2_000));
    }
}
