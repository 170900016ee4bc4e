//! Circuit breaker over a shared [`BreakerStore`].
//!
//! State lives in the store, so every worker sharing the store sees the same
//! breaker. OPEN turns into HALF_OPEN lazily: the first state read after
//! `reset_timeout` has elapsed since the last failure writes and reports
//! HALF_OPEN. There is no background timer.
//!
//! The store makes each mutation atomic, but `call` reads the state and then
//! acts on it without a transaction. Two workers failing at the same moment
//! can both see "below threshold"; the next failure opens the breaker
//! instead. Fixing that needs a lock around every protected call.
//!
//! Store errors never block traffic: an unreadable breaker reads as CLOSED.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use funnel_state::{BreakerStore, StateError};
use funnel_types::breaker::CircuitState;
use funnel_types::error::AdapterError;
use serde::Serialize;

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

/// Signal returned instead of invoking the protected call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{service}' is open, service unavailable")]
pub struct CircuitOpen {
    pub service: String,
    /// Time left until the breaker will allow a probe.
    pub retry_after: Duration,
}

impl From<CircuitOpen> for AdapterError {
    fn from(open: CircuitOpen) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let ms = open.retry_after.as_millis() as u64;
        AdapterError::circuit_open(open.service, ms)
    }
}

/// Outcome of a rejected or failed [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the wrapped function.
    Open(CircuitOpen),
    /// The wrapped function ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(open) => write!(f, "{open}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

impl From<BreakerError<AdapterError>> for AdapterError {
    fn from(err: BreakerError<AdapterError>) -> Self {
        match err {
            BreakerError::Open(open) => open.into(),
            BreakerError::Inner(e) => e,
        }
    }
}

/// Operational view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub total_success: u64,
    pub total_failure: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// `false` when the store could not be read and the counters are blank.
    pub available: bool,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    store: Arc<dyn BreakerStore>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, store: Arc<dyn BreakerStore>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn timeout_ms(&self) -> i64 {
        i64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    /// Current state, promoting an expired OPEN to HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        let snap = match self.store.snapshot(&self.name) {
            Ok(snap) => snap,
            Err(e) => {
                tracing::warn!(service = %self.name, error = %e, "Breaker store unreadable, failing open");
                return CircuitState::Closed;
            }
        };

        if snap.state != CircuitState::Open {
            return snap.state;
        }
        let expired = snap
            .last_failure_ms
            .is_some_and(|last| now_ms().saturating_sub(last) > self.timeout_ms());
        if !expired {
            return CircuitState::Open;
        }

        if let Err(e) = self.store.set_state(&self.name, CircuitState::HalfOpen) {
            tracing::warn!(service = %self.name, error = %e, "Failed to record half-open state");
        }
        tracing::info!(service = %self.name, "Circuit half-open, next call is a probe");
        CircuitState::HalfOpen
    }

    pub fn failure_count(&self) -> u32 {
        self.store
            .snapshot(&self.name)
            .map(|s| s.failure_count)
            .unwrap_or(0)
    }

    fn open_signal(&self) -> CircuitOpen {
        let remaining_ms = self
            .store
            .snapshot(&self.name)
            .ok()
            .and_then(|s| s.last_failure_ms)
            .map_or(self.timeout_ms(), |last| {
                (self.timeout_ms() - now_ms().saturating_sub(last)).max(0)
            });
        CircuitOpen {
            service: self.name.clone(),
            retry_after: Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0)),
        }
    }

    /// Invoke `f` through the breaker.
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] without invoking `f` while the breaker is open;
    /// [`BreakerError::Inner`] with `f`'s own error otherwise.
    pub fn call<T, E: fmt::Display>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        if self.state() == CircuitState::Open {
            return Err(BreakerError::Open(self.open_signal()));
        }

        match f() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(&e.to_string());
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn on_success(&self) {
        if let Err(e) = self.store.close(&self.name) {
            tracing::warn!(service = %self.name, error = %e, "Failed to close breaker");
        }
        if let Err(e) = self.store.record_success(&self.name) {
            tracing::debug!(service = %self.name, error = %e, "Failed to record breaker success");
        }
    }

    fn on_failure(&self, message: &str) {
        match self.store.increment_failures(&self.name, now_ms()) {
            Ok(count) if count >= self.config.failure_threshold => {
                if let Err(e) = self.store.set_state(&self.name, CircuitState::Open) {
                    tracing::warn!(service = %self.name, error = %e, "Failed to open breaker");
                }
                tracing::warn!(
                    service = %self.name,
                    failures = count,
                    threshold = self.config.failure_threshold,
                    error = message,
                    "Circuit opened"
                );
            }
            Ok(count) => {
                tracing::info!(
                    service = %self.name,
                    failures = count,
                    threshold = self.config.failure_threshold,
                    error = message,
                    "Circuit failure recorded"
                );
            }
            Err(e) => {
                tracing::warn!(service = %self.name, error = %e, "Failed to record breaker failure");
            }
        }
        if let Err(e) = self.store.record_failure(&self.name, message) {
            tracing::debug!(service = %self.name, error = %e, "Failed to record breaker health");
        }
    }

    /// Force CLOSED and zero the failure counter.
    ///
    /// # Errors
    ///
    /// Returns the store error if the reset could not be written.
    pub fn reset(&self) -> Result<(), StateError> {
        self.store.close(&self.name)?;
        tracing::info!(service = %self.name, "Circuit manually reset");
        Ok(())
    }

    pub fn health(&self) -> BreakerHealth {
        let state = self.state();
        let reset_timeout_secs = self.config.reset_timeout.as_secs();
        match (self.store.snapshot(&self.name), self.store.health(&self.name)) {
            (Ok(snap), Ok(h)) => BreakerHealth {
                name: self.name.clone(),
                state,
                failure_count: snap.failure_count,
                failure_threshold: self.config.failure_threshold,
                reset_timeout_secs,
                total_success: h.total_success,
                total_failure: h.total_failure,
                last_success: h.last_success,
                last_failure: h.last_failure,
                last_error: h.last_error,
                available: true,
            },
            _ => BreakerHealth {
                name: self.name.clone(),
                state,
                failure_count: 0,
                failure_threshold: self.config.failure_threshold,
                reset_timeout_secs,
                total_success: 0,
                total_failure: 0,
                last_success: None,
                last_failure: None,
                last_error: None,
                available: false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One breaker per configured service, all sharing one store.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: BTreeMap<String, CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn BreakerStore>) -> Self {
        let breakers = config
            .breaker_services()
            .into_iter()
            .map(|name| {
                let settings = config.breaker_settings(&name);
                let breaker = CircuitBreaker::new(
                    name.clone(),
                    BreakerConfig {
                        failure_threshold: settings.failure_threshold,
                        reset_timeout: settings.reset_timeout(),
                    },
                    Arc::clone(&store),
                );
                (name, breaker)
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, service: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(service)
    }

    pub fn health(&self) -> Vec<BreakerHealth> {
        self.breakers.values().map(CircuitBreaker::health).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_state::MemoryBreakerStore;
    use funnel_types::breaker::{BreakerSnapshot, HealthCounters};
    use std::cell::Cell;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "insightiq",
            BreakerConfig {
                failure_threshold: threshold,
                reset_timeout: timeout,
            },
            Arc::new(MemoryBreakerStore::new()),
        )
    }

    fn fail(cb: &CircuitBreaker) {
        let r: Result<(), BreakerError<String>> = cb.call(|| Err("boom".to_string()));
        assert!(matches!(r, Err(BreakerError::Inner(_))));
    }

    fn succeed(cb: &CircuitBreaker) {
        let r: Result<u8, BreakerError<String>> = cb.call(|| Ok(1));
        assert_eq!(r.unwrap(), 1);
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, Duration::from_secs(60));
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn test_open_rejects_without_calling() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            fail(&cb);
        }

        let called = Cell::new(false);
        let result: Result<(), BreakerError<String>> = cb.call(|| {
            called.set(true);
            Ok(())
        });
        assert!(!called.get());
        match result {
            Err(BreakerError::Open(open)) => {
                assert_eq!(open.service, "insightiq");
                assert!(open.retry_after <= Duration::from_secs(60));
                assert!(open.retry_after > Duration::from_secs(50));
            }
            other => panic!("expected open signal, got {other:?}"),
        }
    }

    #[test]
    fn test_success_resets_counter_while_closed() {
        let cb = breaker(3, Duration::from_secs(60));
        fail(&cb);
        fail(&cb);
        succeed(&cb);
        assert_eq!(cb.failure_count(), 0);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = breaker(2, Duration::from_millis(50));
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = breaker(2, Duration::from_millis(50));
        fail(&cb);
        fail(&cb);
        std::thread::sleep(Duration::from_millis(120));
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, Duration::from_millis(50));
        fail(&cb);
        fail(&cb);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker(1, Duration::from_secs(60));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_health_counters() {
        let cb = breaker(5, Duration::from_secs(60));
        succeed(&cb);
        succeed(&cb);
        fail(&cb);

        let health = cb.health();
        assert!(health.available);
        assert_eq!(health.total_success, 2);
        assert_eq!(health.total_failure, 1);
        assert_eq!(health.failure_count, 1);
        assert_eq!(health.failure_threshold, 5);
        assert_eq!(health.last_error.as_deref(), Some("boom"));
        assert!(health.last_success.is_some());
    }

    #[test]
    fn test_shared_store_is_visible_to_every_breaker() {
        let store: Arc<dyn BreakerStore> = Arc::new(MemoryBreakerStore::new());
        let config = BreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        };
        let a = CircuitBreaker::new("apify", config, Arc::clone(&store));
        let b = CircuitBreaker::new("apify", config, Arc::clone(&store));
        fail(&a);
        fail(&b);
        assert_eq!(a.state(), CircuitState::Open);
    }

    struct BrokenStore;

    impl BreakerStore for BrokenStore {
        fn snapshot(&self, _: &str) -> funnel_state::error::Result<BreakerSnapshot> {
            Err(StateError::LockPoisoned)
        }
        fn set_state(&self, _: &str, _: CircuitState) -> funnel_state::error::Result<()> {
            Err(StateError::LockPoisoned)
        }
        fn increment_failures(&self, _: &str, _: i64) -> funnel_state::error::Result<u32> {
            Err(StateError::LockPoisoned)
        }
        fn close(&self, _: &str) -> funnel_state::error::Result<()> {
            Err(StateError::LockPoisoned)
        }
        fn record_success(&self, _: &str) -> funnel_state::error::Result<()> {
            Err(StateError::LockPoisoned)
        }
        fn record_failure(&self, _: &str, _: &str) -> funnel_state::error::Result<()> {
            Err(StateError::LockPoisoned)
        }
        fn health(&self, _: &str) -> funnel_state::error::Result<HealthCounters> {
            Err(StateError::LockPoisoned)
        }
    }

    #[test]
    fn test_unreadable_store_fails_open() {
        let cb = CircuitBreaker::new(
            "openai",
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(60),
            },
            Arc::new(BrokenStore),
        );
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        succeed(&cb);
        assert!(cb.reset().is_err());
        assert!(!cb.health().available);
    }

    #[test]
    fn test_circuit_open_converts_to_adapter_error() {
        let err: AdapterError = CircuitOpen {
            service: "hubspot".into(),
            retry_after: Duration::from_millis(2_500),
        }
        .into();
        assert!(err.is_circuit_open());
        assert_eq!(err.retry_after_ms, Some(2_500));
    }

    #[test]
    fn test_registry_builds_configured_breakers() {
        let registry =
            BreakerRegistry::from_config(&PipelineConfig::default(), Arc::new(MemoryBreakerStore::new()));
        let insightiq = registry.get("insightiq").unwrap();
        assert_eq!(insightiq.config().failure_threshold, 3);
        assert_eq!(insightiq.config().reset_timeout, Duration::from_secs(300));
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.health().len(), 6);
    }
}
