//! Adapter output for one stage invocation.

use serde_json::{Map, Value};

use crate::profile::Profile;

/// Returned by every `StageAdapter::run`. Folded into the run, never persisted.
#[derive(Debug, Clone, Default)]
pub struct StageResult {
    /// Profiles that survive into the next stage.
    pub profiles: Vec<Profile>,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Per-record failures, one human-readable line each.
    pub errors: Vec<String>,
    pub meta: Map<String, Value>,
    /// Dollars spent by this invocation.
    pub cost: f64,
}

impl StageResult {
    #[must_use]
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self {
            profiles,
            ..Self::default()
        }
    }

    /// Record a per-record failure.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(message.into());
    }

    /// Records that completed without error.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.processed.saturating_sub(self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_saturates() {
        let mut r = StageResult::new(Vec::new());
        r.processed = 2;
        r.record_failure("a");
        r.record_failure("b");
        r.record_failure("c");
        assert_eq!(r.failed, 3);
        assert_eq!(r.succeeded(), 0);
        assert_eq!(r.errors.len(), 3);
    }
}
