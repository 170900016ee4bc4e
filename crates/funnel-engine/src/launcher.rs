//! Run creation and background execution.
//!
//! The launcher persists a queued run and hands it to a blocking worker
//! thread. The returned [`JobHandle`] enforces the job timeout: when it
//! fires, the run is recorded as failed and the worker is abandoned. The
//! worker sees the cancellation flag before its next stage and stops
//! writing the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use funnel_state::StateError;
use funnel_types::filters::{PARENT_RUN_KEY, RETRY_FROM_KEY};
use funnel_types::run::{RunError, RECENT_ERRORS};
use funnel_types::stage::UnknownStage;
use funnel_types::state::FilterStaleness;
use funnel_types::{Filters, Platform, Run, RunId, Stage};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::budget::{apply_budget_defaults, estimate_total_cost, needs_confirmation};
use crate::context::PipelineContext;
use crate::errors::PipelineError;
use crate::fingerprint::filter_fingerprint;
use crate::notify::notify_failed;
use crate::orchestrator::run_pipeline;
use crate::persist;
use crate::registry::RegistryError;
use crate::summary::run_summary;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Unsupported(#[from] RegistryError),
    #[error(transparent)]
    UnknownStage(#[from] UnknownStage),
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error("state backend error: {0}")]
    State(#[from] StateError),
    #[error("launcher requires a tokio runtime")]
    NoRuntime,
}

/// Pre-flight view shown before a run is launched.
#[derive(Debug, Clone, Serialize)]
pub struct Preflight {
    pub platform: Platform,
    /// Effective budget after defaults and clamping.
    pub max_budget: f64,
    pub estimated_cost: f64,
    pub needs_confirmation: bool,
    /// Previous use of the same filters, if any.
    pub staleness: Option<FilterStaleness>,
}

/// Status view of a run: the full record with checkpoints elided and only
/// the most recent errors.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    #[serde(flatten)]
    pub run: Run,
    pub error_count: usize,
    /// Stages holding a usable checkpoint.
    pub checkpoints: Vec<Stage>,
}

impl RunStatusView {
    fn from_run(mut run: Run) -> Self {
        let error_count = run.errors.len();
        let checkpoints = Stage::ORDER
            .into_iter()
            .filter(|s| run.checkpoint(*s).is_some())
            .collect();
        let recent: Vec<RunError> = run.recent_errors(RECENT_ERRORS).to_vec();
        run.errors = recent;
        run.stage_outputs.clear();
        Self {
            run,
            error_count,
            checkpoints,
        }
    }
}

pub struct Launcher {
    ctx: Arc<PipelineContext>,
    job_timeout: Duration,
    runtime: Handle,
}

impl Launcher {
    /// # Errors
    ///
    /// Returns [`LaunchError::NoRuntime`] outside a tokio runtime.
    pub fn new(ctx: PipelineContext, job_timeout: Duration) -> Result<Self, LaunchError> {
        let runtime = Handle::try_current().map_err(|_| LaunchError::NoRuntime)?;
        Ok(Self {
            ctx: Arc::new(ctx),
            job_timeout,
            runtime,
        })
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Budget, estimate and staleness for a prospective run.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Unsupported`] for platforms without discovery.
    pub fn preflight(&self, platform: Platform, filters: &Filters) -> Result<Preflight, LaunchError> {
        self.ctx.registry.ensure_supported(platform)?;
        let mut filters = filters.clone();
        let max_budget = apply_budget_defaults(&mut filters, platform, &self.ctx.cost);
        let estimated_cost = estimate_total_cost(&self.ctx.registry, platform, &filters);

        let fingerprint = filter_fingerprint(platform, &filters);
        let staleness = match self.ctx.state.filter_staleness(&fingerprint) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Failed to read filter history");
                None
            }
        };

        Ok(Preflight {
            platform,
            max_budget,
            estimated_cost,
            needs_confirmation: needs_confirmation(estimated_cost, &self.ctx.cost.guardrails),
            staleness,
        })
    }

    /// Create, persist and enqueue a run.
    ///
    /// # Errors
    ///
    /// Fails for unsupported platforms and when the run cannot be saved.
    pub fn launch_run(&self, platform: Platform, mut filters: Filters) -> Result<(Run, JobHandle), LaunchError> {
        self.ctx.registry.ensure_supported(platform)?;
        apply_budget_defaults(&mut filters, platform, &self.ctx.cost);

        let mut run = Run::new(platform, filters);
        run.estimated_cost = estimate_total_cost(&self.ctx.registry, platform, &run.filters);
        self.ctx.state.save_run(&run)?;

        tracing::info!(
            run_id = %run.id,
            platform = %platform,
            estimated_cost = run.estimated_cost,
            max_budget = run.filters.max_budget(),
            "Run queued"
        );
        let job = self.spawn(run.id.clone(), None);
        Ok((run, job))
    }

    /// Start a new run that resumes `parent` at `from_stage`.
    ///
    /// The new run carries the parent's filters plus retry markers and a
    /// copy of its checkpoints.
    ///
    /// # Errors
    ///
    /// Fails for unknown stage names, unknown runs and storage errors.
    pub fn retry_run(&self, parent: &RunId, from_stage: &str) -> Result<(Run, JobHandle), LaunchError> {
        let stage: Stage = from_stage.parse()?;
        let original = self
            .ctx
            .state
            .load_run(parent)?
            .ok_or_else(|| LaunchError::RunNotFound(parent.clone()))?;

        let mut filters = original.filters.clone();
        filters.set(RETRY_FROM_KEY, stage.as_str());
        filters.set(PARENT_RUN_KEY, parent.as_str());

        let mut run = Run::new(original.platform, filters);
        run.stage_outputs = original.stage_outputs;
        self.ctx.state.save_run(&run)?;

        tracing::info!(
            run_id = %run.id,
            parent_run_id = %parent,
            retry_from = %stage,
            checkpoints = run.stage_outputs.len(),
            "Retry run queued"
        );
        let job = self.spawn(run.id.clone(), Some(stage));
        Ok((run, job))
    }

    /// Current status with the last [`RECENT_ERRORS`] errors.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the run could not be read.
    pub fn run_status(&self, run_id: &RunId) -> Result<Option<RunStatusView>, StateError> {
        Ok(self.ctx.state.load_run(run_id)?.map(RunStatusView::from_run))
    }

    fn spawn(&self, run_id: RunId, retry_from: Option<Stage>) -> JobHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let task = {
            let ctx = Arc::clone(&self.ctx);
            let cancel = Arc::clone(&cancel);
            let run_id = run_id.clone();
            self.runtime
                .spawn_blocking(move || run_pipeline(&ctx, &run_id, retry_from, &cancel))
        };
        JobHandle {
            run_id,
            task,
            cancel,
            timeout: self.job_timeout,
            ctx: Arc::clone(&self.ctx),
        }
    }
}

/// Handle to one enqueued run.
pub struct JobHandle {
    run_id: RunId,
    task: JoinHandle<Result<Run, PipelineError>>,
    cancel: Arc<AtomicBool>,
    timeout: Duration,
    ctx: Arc<PipelineContext>,
}

impl JobHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the worker, at most the job timeout.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, [`PipelineError::Infrastructure`] if the
    /// worker panicked, or [`PipelineError::TimedOut`] after recording the
    /// run as failed.
    pub async fn wait(self) -> Result<Run, PipelineError> {
        let Self {
            run_id,
            task,
            cancel,
            timeout,
            ctx,
        } = self;

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PipelineError::Infrastructure(anyhow!(
                "pipeline worker for run {run_id} failed: {join_err}"
            ))),
            Err(_) => {
                cancel.store(true, Ordering::Release);
                tracing::error!(run_id = %run_id, timeout_secs = timeout.as_secs(), "Run exceeded job timeout");
                let id = run_id.clone();
                tokio::task::spawn_blocking(move || record_timeout(&ctx, &id, timeout))
                    .await
                    .map_err(|e| PipelineError::Infrastructure(anyhow!("timeout bookkeeping task panicked: {e}")))?;
                Err(PipelineError::TimedOut(timeout))
            }
        }
    }
}

/// Mark a timed-out run failed unless the worker already finalized it.
fn record_timeout(ctx: &PipelineContext, run_id: &RunId, timeout: Duration) {
    let mut run = match ctx.state.load_run(run_id) {
        Ok(Some(run)) => run,
        Ok(None) => {
            tracing::error!(run_id = %run_id, "Timed-out run vanished from state");
            return;
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Failed to load timed-out run");
            return;
        }
    };
    if run.status.is_terminal() {
        return;
    }
    run.fail(PipelineError::TimedOut(timeout).to_string());
    run.summary = run_summary(&run, true);
    persist::persist_run(ctx.state.as_ref(), &run);
    notify_failed(ctx.notifier.as_ref(), &run);
}
