//! The [`Run`] entity: persistent state of one pipeline execution.
//!
//! Mutators are pure in-memory updates. Persisting is the caller's job
//! (see `StateBackend::save_run`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filters::Filters;
use crate::profile::Tier;
use crate::stage::{Platform, RunStatus, Stage};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque run identifier (UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for RunId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Progress and errors
// ---------------------------------------------------------------------------

/// Per-stage progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Outcome passed to [`Run::increment_stage_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Completed,
    Failed,
}

/// One entry of the run error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub stage: Stage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Number of errors exposed by status views.
pub const RECENT_ERRORS: usize = 20;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub platform: Platform,
    pub status: RunStatus,
    pub current_stage: Stage,
    #[serde(default)]
    pub filters: Filters,
    pub stage_progress: BTreeMap<Stage, StageProgress>,
    /// Checkpoints: stage -> primitive JSON snapshot of the stage output.
    #[serde(default)]
    pub stage_outputs: BTreeMap<Stage, Vec<Value>>,
    pub profiles_found: u64,
    pub profiles_pre_screened: u64,
    pub profiles_enriched: u64,
    pub profiles_scored: u64,
    pub contacts_synced: u64,
    pub duplicates_skipped: u64,
    pub tier_distribution: BTreeMap<Tier, u64>,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    #[serde(default)]
    pub errors: Vec<RunError>,
    #[serde(default)]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a queued run.
    #[must_use]
    pub fn new(platform: Platform, filters: Filters) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            platform,
            status: RunStatus::Queued,
            current_stage: Stage::Discovery,
            filters,
            stage_progress: Stage::ORDER
                .into_iter()
                .map(|s| (s, StageProgress::default()))
                .collect(),
            stage_outputs: BTreeMap::new(),
            profiles_found: 0,
            profiles_pre_screened: 0,
            profiles_enriched: 0,
            profiles_scored: 0,
            contacts_synced: 0,
            duplicates_skipped: 0,
            tier_distribution: Tier::ALL.into_iter().map(|t| (t, 0)).collect(),
            estimated_cost: 0.0,
            actual_cost: 0.0,
            errors: Vec::new(),
            summary: String::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Enter `stage` with the matching running status.
    pub fn update_stage(&mut self, stage: Stage) {
        self.current_stage = stage;
        self.status = stage.running_status();
        self.touch();
    }

    /// Reset a stage's counters to `{total, 0, 0}`.
    pub fn reset_stage_progress(&mut self, stage: Stage, total: u64) {
        self.stage_progress.insert(
            stage,
            StageProgress {
                total,
                completed: 0,
                failed: 0,
            },
        );
        self.touch();
    }

    pub fn increment_stage_progress(&mut self, stage: Stage, outcome: ProgressOutcome) {
        let progress = self.stage_progress.entry(stage).or_default();
        match outcome {
            ProgressOutcome::Completed => progress.completed += 1,
            ProgressOutcome::Failed => progress.failed += 1,
        }
        self.touch();
    }

    /// Overwrite completed/failed with the totals reported by an adapter.
    pub fn set_stage_counts(&mut self, stage: Stage, completed: u64, failed: u64) {
        let progress = self.stage_progress.entry(stage).or_default();
        progress.completed = completed;
        progress.failed = failed;
        self.touch();
    }

    #[must_use]
    pub fn progress(&self, stage: Stage) -> StageProgress {
        self.stage_progress.get(&stage).copied().unwrap_or_default()
    }

    pub fn add_error(&mut self, stage: Stage, message: impl Into<String>) {
        self.errors.push(RunError {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Accumulate spend. Negative and non-finite amounts are ignored so the
    /// total never decreases.
    pub fn add_cost(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.actual_cost += amount;
            self.touch();
        }
    }

    /// Mark failed and log `reason` against the current stage.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !reason.is_empty() {
            self.add_error(self.current_stage, reason);
        }
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.touch();
    }

    /// Most recent errors, oldest first.
    #[must_use]
    pub fn recent_errors(&self, limit: usize) -> &[RunError] {
        let start = self.errors.len().saturating_sub(limit);
        &self.errors[start..]
    }

    /// Message of the most recent error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(|e| e.message.as_str())
    }

    /// Checkpoint stored for `stage`, ignoring empty snapshots.
    #[must_use]
    pub fn checkpoint(&self, stage: Stage) -> Option<&[Value]> {
        self.stage_outputs
            .get(&stage)
            .map(Vec::as_slice)
            .filter(|records| !records.is_empty())
    }
}
