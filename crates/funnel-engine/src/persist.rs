//! Best-effort persistence helpers used by the orchestrator.
//!
//! Each helper logs and swallows storage errors; a failed write never
//! changes the outcome of a run.

use funnel_state::StateBackend;
use funnel_types::checkpoint::to_checkpoint;
use funnel_types::state::FilterHistoryEntry;
use funnel_types::{Profile, Run, Stage};

use crate::fingerprint::filter_fingerprint;

pub(crate) fn persist_run(state: &dyn StateBackend, run: &Run) {
    if let Err(e) = state.save_run(run) {
        tracing::error!(
            run_id = %run.id,
            status = %run.status,
            error = %e,
            "Failed to persist run"
        );
    }
}

pub(crate) fn persist_lead_results(state: &dyn StateBackend, run: &Run, profiles: &[Profile]) {
    if profiles.is_empty() {
        return;
    }
    match state.persist_lead_results(run, profiles) {
        Ok(written) => {
            tracing::info!(run_id = %run.id, leads = written, "Persisted lead results");
        }
        Err(e) => {
            tracing::error!(
                run_id = %run.id,
                leads = profiles.len(),
                error = %e,
                "Failed to persist lead results"
            );
        }
    }
}

/// Drop already-known leads. On storage failure every profile is kept and
/// no duplicates are reported.
pub(crate) fn dedup(state: &dyn StateBackend, run: &Run, profiles: Vec<Profile>) -> (Vec<Profile>, u64) {
    // Kept so the fallback can return the input after a failed call.
    let fallback = profiles.clone();
    match state.dedup_profiles(profiles, run.platform) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(run_id = %run.id, error = %e, "Dedup failed, keeping all profiles");
            (fallback, 0)
        }
    }
}

pub(crate) fn record_filter_history(state: &dyn StateBackend, run: &Run, total_found: u64, new_found: u64) {
    let entry = FilterHistoryEntry {
        fingerprint: filter_fingerprint(run.platform, &run.filters),
        platform: run.platform,
        run_id: run.id.clone(),
        total_found,
        new_found,
    };
    if let Err(e) = state.record_filter_history(&entry) {
        tracing::warn!(
            run_id = %run.id,
            fingerprint = %entry.fingerprint,
            error = %e,
            "Failed to record filter history"
        );
    }
}

/// Store the stage output under `stage_outputs[stage]`.
pub(crate) fn checkpoint(run: &mut Run, stage: Stage, profiles: &[Profile]) {
    match to_checkpoint(profiles) {
        Ok(records) => {
            run.stage_outputs.insert(stage, records);
        }
        Err(e) => {
            tracing::warn!(run_id = %run.id, stage = %stage, error = %e, "Failed to checkpoint stage output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_state::SqliteStateBackend;
    use funnel_types::profile::Attachment;
    use funnel_types::{Filters, Platform, Tier};

    #[test]
    fn test_checkpoint_stores_records() {
        let mut run = Run::new(Platform::Patreon, Filters::new());
        let mut p = Profile::new("p1", Platform::Patreon);
        p.attach(Attachment::Score {
            lead_score: 0.9,
            tier: Tier::AutoEnroll,
            reasoning: None,
        });
        checkpoint(&mut run, Stage::Scoring, &[p]);
        let records = run.checkpoint(Stage::Scoring).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["identity"]["id"], "p1");
    }

    #[test]
    fn test_dedup_and_history_roundtrip() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let run = Run::new(Platform::Instagram, Filters::new().with("hashtags", "travel"));
        let profiles = vec![
            Profile::new("a", Platform::Instagram),
            Profile::new("b", Platform::Instagram),
        ];

        persist_lead_results(&state, &run, &profiles[..1]);
        let (fresh, dupes) = dedup(&state, &run, profiles);
        assert_eq!(dupes, 1);
        assert_eq!(fresh.len(), 1);

        record_filter_history(&state, &run, 2, 1);
        let staleness = state
            .filter_staleness(&filter_fingerprint(run.platform, &run.filters))
            .unwrap()
            .unwrap();
        assert_eq!(staleness.total_found, 2);
        assert_eq!(staleness.new_found, 1);
    }
}
