//! Pipeline orchestrator: walks one run through the fixed stage order,
//! enforcing the budget, checkpointing outputs and finalizing the run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context as _};
use funnel_types::checkpoint::from_checkpoint;
use funnel_types::{Profile, Run, RunId, Stage, StageResult, Tier};

use crate::adapter::{StageAdapter, StageContext};
use crate::budget::{check_admission, Admission};
use crate::context::PipelineContext;
use crate::errors::PipelineError;
use crate::notify::{notify_completed, notify_failed};
use crate::persist;
use crate::registry::RegistryError;
use crate::summary::run_summary;

/// Execute the run `run_id`, optionally resuming at `retry_from`.
///
/// Returns the finalized run. A stage failure or a budget stop is recorded
/// on the run (status `failed`) and returned as `Ok`; `Err` is reserved for
/// a missing run and for cancellation. Once `cancel` is set the worker
/// stops writing the run and returns [`PipelineError::Cancelled`] before
/// the next stage.
///
/// # Errors
///
/// Returns [`PipelineError::Infrastructure`] when the run cannot be loaded
/// and [`PipelineError::Cancelled`] when cancellation is observed.
pub fn run_pipeline(
    ctx: &PipelineContext,
    run_id: &RunId,
    retry_from: Option<Stage>,
    cancel: &AtomicBool,
) -> Result<Run, PipelineError> {
    let mut run = ctx
        .state
        .load_run(run_id)
        .with_context(|| format!("failed to load run {run_id}"))?
        .ok_or_else(|| anyhow!("run {run_id} not found"))?;

    tracing::info!(
        run_id = %run.id,
        platform = %run.platform,
        retry_from = retry_from.map(Stage::as_str),
        "Starting pipeline run"
    );

    let worker = Worker { ctx, cancel };
    let (start, mut profiles) = resume_point(ctx, &run, retry_from);

    for stage in Stage::ORDER {
        if stage < start {
            continue;
        }
        if cancel.load(Ordering::Acquire) {
            tracing::warn!(run_id = %run.id, stage = %stage, "Run cancelled, abandoning");
            return Err(PipelineError::Cancelled);
        }

        let adapter = match ctx.registry.resolve(stage, run.platform) {
            Ok(adapter) => adapter,
            Err(RegistryError::StageNotRegistered(_)) => {
                tracing::debug!(run_id = %run.id, stage = %stage, "Stage not applicable, bypassing");
                continue;
            }
            Err(e) => {
                tracing::warn!(run_id = %run.id, stage = %stage, error = %e, "Skipping stage");
                continue;
            }
        };

        let estimate = adapter.estimate_cost(profiles.len() as u64);
        match check_admission(&run, estimate, ctx.cost.warning_threshold(run.platform)) {
            Admission::Proceed => {}
            Admission::Warn(message) => {
                tracing::warn!(run_id = %run.id, stage = %stage, "{message}");
                run.add_error(stage, message);
            }
            Admission::Reject(message) => {
                tracing::warn!(
                    run_id = %run.id,
                    stage = %stage,
                    actual_cost = run.actual_cost,
                    estimate,
                    "Budget exceeded, stopping run"
                );
                worker.finish_failed(&mut run, message);
                return Ok(run);
            }
        }

        run.update_stage(stage);
        let total = if stage == Stage::Discovery { 0 } else { profiles.len() as u64 };
        run.reset_stage_progress(stage, total);
        worker.save(&run);

        tracing::info!(run_id = %run.id, stage = %stage, profiles_in = profiles.len(), "Stage started");
        let result = match invoke(adapter.as_ref(), profiles, &mut run, stage, ctx, cancel) {
            Ok(result) => result,
            Err(reason) => {
                tracing::error!(run_id = %run.id, stage = %stage, error = %reason, "Stage failed");
                worker.finish_failed(&mut run, format!("Stage '{stage}' failed: {reason}"));
                return Ok(run);
            }
        };

        let (processed, failed, skipped) = (result.processed, result.failed, result.skipped);
        profiles = fold_result(&mut run, stage, result);

        if stage == Stage::Discovery && !profiles.is_empty() {
            let total_before = profiles.len() as u64;
            let (fresh, dupes) = persist::dedup(ctx.state.as_ref(), &run, profiles);
            profiles = fresh;
            run.duplicates_skipped = dupes;
            run.profiles_found = profiles.len() as u64;
            persist::record_filter_history(ctx.state.as_ref(), &run, total_before, run.profiles_found);
        }

        persist::checkpoint(&mut run, stage, &profiles);
        worker.save(&run);

        tracing::info!(
            run_id = %run.id,
            stage = %stage,
            profiles_out = profiles.len(),
            processed,
            failed,
            skipped,
            "Stage finished"
        );

        if profiles.is_empty() && !stage.is_terminal() {
            tracing::warn!(run_id = %run.id, stage = %stage, "No profiles left, stopping early");
            worker.finish_completed(&mut run, &profiles);
            return Ok(run);
        }
    }

    if cancel.load(Ordering::Acquire) {
        return Err(PipelineError::Cancelled);
    }
    worker.finish_completed(&mut run, &profiles);
    Ok(run)
}

/// First stage to execute and its input profiles.
///
/// Walks back from `retry_from` over stages that would not run for this
/// platform. The nearest applicable stage must have a checkpoint, otherwise
/// the run restarts from discovery.
fn resume_point(ctx: &PipelineContext, run: &Run, retry_from: Option<Stage>) -> (Stage, Vec<Profile>) {
    let Some(target) = retry_from.filter(|s| *s != Stage::Discovery) else {
        return (Stage::Discovery, Vec::new());
    };

    let mut cursor = target.previous();
    while let Some(prev) = cursor {
        if let Some(records) = run.checkpoint(prev) {
            match from_checkpoint(records) {
                Ok(profiles) => {
                    tracing::info!(
                        run_id = %run.id,
                        retry_from = %target,
                        checkpoint = %prev,
                        profiles = profiles.len(),
                        "Resuming from checkpoint"
                    );
                    return (target, profiles);
                }
                Err(e) => {
                    tracing::warn!(run_id = %run.id, checkpoint = %prev, error = %e, "Unreadable checkpoint");
                    break;
                }
            }
        }
        if ctx.registry.is_applicable(prev, run.platform) {
            break;
        }
        cursor = prev.previous();
    }

    tracing::info!(run_id = %run.id, retry_from = %target, "No usable checkpoint, starting from discovery");
    (Stage::Discovery, Vec::new())
}

/// Run one adapter, converting panics into a failure reason.
fn invoke(
    adapter: &dyn StageAdapter,
    profiles: Vec<Profile>,
    run: &mut Run,
    stage: Stage,
    ctx: &PipelineContext,
    cancel: &AtomicBool,
) -> Result<StageResult, PipelineError> {
    let mut stage_ctx = StageContext::new(run, stage, ctx.state.as_ref(), cancel);
    match catch_unwind(AssertUnwindSafe(|| adapter.run(profiles, &mut stage_ctx))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(PipelineError::Adapter(e)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(PipelineError::Infrastructure(anyhow!("adapter panicked: {message}")))
        }
    }
}

/// Fold a stage result into the run and return the surviving profiles.
fn fold_result(run: &mut Run, stage: Stage, result: StageResult) -> Vec<Profile> {
    run.set_stage_counts(stage, result.succeeded(), result.failed);
    for error in result.errors {
        run.add_error(stage, error);
    }
    run.add_cost(result.cost);

    let out = result.profiles.len() as u64;
    match stage {
        Stage::Discovery => run.profiles_found = out,
        Stage::PreScreen => run.profiles_pre_screened = out,
        Stage::Enrichment => run.profiles_enriched = out,
        Stage::Analysis => {}
        Stage::Scoring => {
            run.profiles_scored = out;
            run.tier_distribution = tier_distribution(&result.profiles);
        }
        Stage::CrmSync => {
            run.contacts_synced = result
                .profiles
                .iter()
                .filter(|p| p.crm_contact().is_some())
                .count() as u64;
        }
    }
    result.profiles
}

fn tier_distribution(profiles: &[Profile]) -> BTreeMap<Tier, u64> {
    let mut counts: BTreeMap<Tier, u64> = Tier::ALL.into_iter().map(|t| (t, 0)).collect();
    for (_, tier) in profiles.iter().filter_map(Profile::score) {
        *counts.entry(tier).or_default() += 1;
    }
    counts
}

/// Run finalization bound to one worker's cancellation flag.
struct Worker<'a> {
    ctx: &'a PipelineContext,
    cancel: &'a AtomicBool,
}

impl Worker<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn save(&self, run: &Run) {
        if !self.cancelled() {
            persist::persist_run(self.ctx.state.as_ref(), run);
        }
    }

    fn finish_completed(&self, run: &mut Run, profiles: &[Profile]) {
        run.summary = run_summary(run, false);
        run.complete();
        if self.cancelled() {
            return;
        }
        persist::persist_run(self.ctx.state.as_ref(), run);
        persist::persist_lead_results(self.ctx.state.as_ref(), run, profiles);
        notify_completed(self.ctx.notifier.as_ref(), run);
        tracing::info!(
            run_id = %run.id,
            found = run.profiles_found,
            synced = run.contacts_synced,
            actual_cost = run.actual_cost,
            "Pipeline run completed"
        );
    }

    fn finish_failed(&self, run: &mut Run, reason: String) {
        run.fail(reason);
        run.summary = run_summary(run, true);
        if self.cancelled() {
            return;
        }
        persist::persist_run(self.ctx.state.as_ref(), run);
        notify_failed(self.ctx.notifier.as_ref(), run);
    }
}
