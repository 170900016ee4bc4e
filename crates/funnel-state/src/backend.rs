//! Storage contracts.
//!
//! [`StateBackend`] persists runs and their lead outcomes and answers the
//! cross-run questions asked after discovery (dedup, filter staleness).
//! [`BreakerStore`] holds circuit-breaker state shared by every worker.
//! Model types live in [`funnel_types::state`] and [`funnel_types::breaker`].

use funnel_types::breaker::{BreakerSnapshot, CircuitState, HealthCounters};
use funnel_types::state::{FilterFingerprint, FilterHistoryEntry, FilterStaleness, LeadRunRecord};
use funnel_types::{Platform, Profile, Run, RunId};

use crate::error;

/// Storage contract for run state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Upsert the full run document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_run(&self, run: &Run) -> error::Result<()>;

    /// Load a run by id. Returns `Ok(None)` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn load_run(&self, id: &RunId) -> error::Result<Option<Run>>;

    /// Most recently created runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(&self, limit: usize) -> error::Result<Vec<Run>>;

    /// Upsert the surviving profiles as leads and link each to `run`.
    /// Returns the number of lead-run rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure;
    /// nothing is written in that case.
    fn persist_lead_results(&self, run: &Run, profiles: &[Profile]) -> error::Result<u64>;

    /// Drop profiles already known as leads for `platform`.
    /// Returns `(new_profiles, duplicate_count)`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn dedup_profiles(
        &self,
        profiles: Vec<Profile>,
        platform: Platform,
    ) -> error::Result<(Vec<Profile>, u64)>;

    /// Append one discovery-yield observation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_filter_history(&self, entry: &FilterHistoryEntry) -> error::Result<()>;

    /// Latest observation for `fingerprint`, or `None` if never used.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn filter_staleness(
        &self,
        fingerprint: &FilterFingerprint,
    ) -> error::Result<Option<FilterStaleness>>;

    /// Lead-run rows written for `run`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn lead_results(&self, run: &RunId) -> error::Result<Vec<LeadRunRecord>>;
}

/// Shared circuit-breaker state.
///
/// Every method is a single atomic operation. Callers combine them without
/// a surrounding transaction, so read-then-act sequences may race.
pub trait BreakerStore: Send + Sync {
    /// Current stored state for `service` (defaults when never written).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn snapshot(&self, service: &str) -> error::Result<BreakerSnapshot>;

    /// Overwrite the state, leaving counters untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_state(&self, service: &str, state: CircuitState) -> error::Result<()>;

    /// Increment the failure counter, stamp `at_ms`, return the new count.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn increment_failures(&self, service: &str, at_ms: i64) -> error::Result<u32>;

    /// Set `Closed` and zero the failure counter.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn close(&self, service: &str) -> error::Result<()>;

    /// Count a success in the health counters.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_success(&self, service: &str) -> error::Result<()>;

    /// Count a failure in the health counters, keeping a truncated message.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_failure(&self, service: &str, message: &str) -> error::Result<()>;

    /// Health counters for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn health(&self, service: &str) -> error::Result<HealthCounters>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_state(_: &dyn StateBackend) {}
        fn _assert_breaker(_: &dyn BreakerStore) {}
    }
}
