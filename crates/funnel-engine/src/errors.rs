//! Pipeline error model and retry backoff policy helpers.

use std::time::Duration;

use funnel_types::error::{AdapterError, BackoffClass};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for stage and run failures
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// `Adapter` wraps a typed `AdapterError` raised by a stage adapter.
///
/// `Infrastructure` wraps opaque host-side errors (state backend failures,
/// adapter panics, missing runs) that no retry at the adapter level fixes.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed adapter error with retry metadata.
    Adapter(AdapterError),
    /// Infrastructure error (state backend, panics, lookups).
    Infrastructure(anyhow::Error),
    /// The worker observed a cancellation request between stages.
    Cancelled,
    /// The job exceeded its wall-clock timeout.
    TimedOut(Duration),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Adapter(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
            Self::Cancelled => f.write_str("run cancelled"),
            Self::TimedOut(after) => write!(f, "exceeded job timeout of {}s", after.as_secs()),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<AdapterError> for PipelineError {
    fn from(e: AdapterError) -> Self {
        Self::Adapter(e)
    }
}

impl PipelineError {
    /// Returns `true` if this is a typed adapter error of a retryable kind.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(e) => e.is_retryable(),
            Self::Infrastructure(_) | Self::Cancelled | Self::TimedOut(_) => false,
        }
    }

    /// Returns the typed adapter error if this is an `Adapter` variant.
    pub fn as_adapter_error(&self) -> Option<&AdapterError> {
        match self {
            Self::Adapter(e) => Some(e),
            _ => None,
        }
    }
}

/// Compute retry delay based on error hints and attempt number.
pub fn compute_backoff(err: &AdapterError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

// ---------------------------------------------------------------------------
// Retry helper for per-record external calls
// ---------------------------------------------------------------------------

/// How many times [`with_retry`] re-invokes a failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` retries are exhausted. Blocks the calling worker
/// between attempts.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns the last `AdapterError` produced by `op`.
pub fn with_retry<T>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T, AdapterError>,
) -> Result<T, AdapterError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt <= policy.max_retries => {
                let delay = compute_backoff(&err, attempt);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    kind = %err.kind,
                    service = %err.service,
                    code = %err.code,
                    "Retryable error, will retry"
                );
                std::thread::sleep(delay);
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(
                        attempt,
                        max_retries = policy.max_retries,
                        service = %err.service,
                        code = %err.code,
                        "Max retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}
