//! Stage adapter contract.
//!
//! One implementation per (stage, platform) pair. Adapters report
//! per-record failures inside [`StageResult`] and return `Err` only when the
//! whole stage cannot proceed; the orchestrator treats `Err` as fatal to the
//! run.

use std::sync::atomic::{AtomicBool, Ordering};

use funnel_state::StateBackend;
use funnel_types::error::AdapterError;
use funnel_types::run::ProgressOutcome;
use funnel_types::{Filters, Profile, Run, Stage, StageResult};
use serde::Serialize;

/// Declarative metadata for reporting. Never consulted by control flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterInfo {
    pub description: String,
    /// External APIs this adapter calls.
    pub apis: Vec<String>,
    pub est_seconds_per_profile: f64,
}

impl AdapterInfo {
    #[must_use]
    pub fn new(description: impl Into<String>, apis: &[&str], est_seconds_per_profile: f64) -> Self {
        Self {
            description: description.into(),
            apis: apis.iter().map(|s| (*s).to_string()).collect(),
            est_seconds_per_profile,
        }
    }
}

pub trait StageAdapter: Send + Sync {
    fn info(&self) -> AdapterInfo;

    /// Process `profiles` (empty for discovery).
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] when the stage as a whole cannot run
    /// (missing credentials, malformed filters, upstream permanently down).
    fn run(
        &self,
        profiles: Vec<Profile>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageResult, AdapterError>;

    /// Pre-flight cost estimate for `count` input profiles. Must be pure.
    fn estimate_cost(&self, _count: u64) -> f64 {
        0.0
    }
}

/// Read access to the run plus the progress callback handed to adapters.
pub struct StageContext<'a> {
    run: &'a mut Run,
    stage: Stage,
    state: &'a dyn StateBackend,
    cancel: &'a AtomicBool,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        run: &'a mut Run,
        stage: Stage,
        state: &'a dyn StateBackend,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            run,
            stage,
            state,
            cancel,
        }
    }

    pub fn run(&self) -> &Run {
        self.run
    }

    pub fn filters(&self) -> &Filters {
        &self.run.filters
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Count one processed record and persist progress for live status views.
    /// Persistence failures are logged and ignored.
    pub fn increment_progress(&mut self, outcome: ProgressOutcome) {
        self.run.increment_stage_progress(self.stage, outcome);
        if self.cancel.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.state.save_run(self.run) {
            tracing::warn!(
                run_id = %self.run.id,
                stage = %self.stage,
                error = %e,
                "Failed to persist stage progress"
            );
        }
    }
}
