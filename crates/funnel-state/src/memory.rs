//! In-process [`BreakerStore`] for single-worker use and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use funnel_types::breaker::{truncate_error, BreakerSnapshot, CircuitState, HealthCounters};

use crate::backend::BreakerStore;
use crate::error::{self, StateError};

#[derive(Default)]
struct Entry {
    snapshot: BreakerSnapshot,
    health: HealthCounters,
}

/// Breaker state held in a process-local map.
#[derive(Default)]
pub struct MemoryBreakerStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBreakerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> error::Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn with_entry<T>(&self, service: &str, f: impl FnOnce(&mut Entry) -> T) -> error::Result<T> {
        let mut entries = self.lock()?;
        Ok(f(entries.entry(service.to_string()).or_default()))
    }
}

impl BreakerStore for MemoryBreakerStore {
    fn snapshot(&self, service: &str) -> error::Result<BreakerSnapshot> {
        Ok(self
            .lock()?
            .get(service)
            .map(|e| e.snapshot)
            .unwrap_or_default())
    }

    fn set_state(&self, service: &str, state: CircuitState) -> error::Result<()> {
        self.with_entry(service, |e| e.snapshot.state = state)
    }

    fn increment_failures(&self, service: &str, at_ms: i64) -> error::Result<u32> {
        self.with_entry(service, |e| {
            e.snapshot.failure_count = e.snapshot.failure_count.saturating_add(1);
            e.snapshot.last_failure_ms = Some(at_ms);
            e.snapshot.failure_count
        })
    }

    fn close(&self, service: &str) -> error::Result<()> {
        self.with_entry(service, |e| {
            e.snapshot.state = CircuitState::Closed;
            e.snapshot.failure_count = 0;
        })
    }

    fn record_success(&self, service: &str) -> error::Result<()> {
        self.with_entry(service, |e| {
            e.health.total_success += 1;
            e.health.last_success = Some(Utc::now());
        })
    }

    fn record_failure(&self, service: &str, message: &str) -> error::Result<()> {
        self.with_entry(service, |e| {
            e.health.total_failure += 1;
            e.health.last_failure = Some(Utc::now());
            e.health.last_error = Some(truncate_error(message));
        })
    }

    fn health(&self, service: &str) -> error::Result<HealthCounters> {
        Ok(self
            .lock()?
            .get(service)
            .map(|e| e.health.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn services_are_isolated() {
        let store = MemoryBreakerStore::new();
        store.increment_failures("openai", 1).unwrap();
        store.increment_failures("openai", 2).unwrap();
        assert_eq!(store.snapshot("openai").unwrap().failure_count, 2);
        assert_eq!(store.snapshot("apollo").unwrap().failure_count, 0);
    }

    #[test]
    fn close_resets_counter_but_not_health() {
        let store = MemoryBreakerStore::new();
        store.increment_failures("apify", 10).unwrap();
        store.record_failure("apify", "boom").unwrap();
        store.set_state("apify", CircuitState::Open).unwrap();
        store.close("apify").unwrap();

        let snap = store.snapshot("apify").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(store.health("apify").unwrap().total_failure, 1);
    }
}
