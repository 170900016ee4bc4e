//! Human-readable run summaries.
//!
//! Built from the run's final counters only; no external calls.

use funnel_types::{Run, Stage, Tier};

const LOW_YIELD_PCT: i64 = 30;
const ENRICHMENT_SUCCESS_FLOOR: f64 = 0.8;
const COST_OVERRUN_RATIO: f64 = 1.2;

/// Summary for a finished run. `failed` selects the failure narrative.
#[must_use]
pub fn run_summary(run: &Run, failed: bool) -> String {
    let platform = run.platform.display_name();
    if failed {
        return failed_summary(run);
    }
    if run.profiles_found == 0 {
        return format!("No {platform} profiles found. Check filters and try again.");
    }

    let found = run.profiles_found;
    let pre = run.profiles_pre_screened;
    let enriched = run.profiles_enriched;
    let synced = run.contacts_synced;
    let auto = tier_count(run, Tier::AutoEnroll);
    let high = tier_count(run, Tier::HighPriorityReview);

    let mut lines = Vec::new();

    let mut discovery = format!("Discovered {found} {platform} profiles");
    if run.duplicates_skipped > 0 {
        discovery.push_str(&format!(" ({} duplicates removed)", run.duplicates_skipped));
    }
    discovery.push('.');
    lines.push(discovery);

    if pre > 0 {
        lines.push(format!(
            "{pre} of {found} passed pre-screen ({}% yield).",
            percent(pre, found)
        ));
    }

    if pre > 0 && enriched > 0 && enriched < pre {
        lines.push(format!("{enriched} of {pre} enriched successfully."));
    }

    if synced > 0 {
        let mut details = Vec::new();
        if auto > 0 {
            details.push(format!("{auto} auto-enroll"));
        }
        if high > 0 {
            details.push(format!("{high} high priority"));
        }
        let mut line = format!("{synced} synced to CRM");
        if !details.is_empty() {
            line.push_str(": ");
            line.push_str(&details.join(", "));
        }
        line.push('.');
        lines.push(line);
        lines.push(format!("{}% overall conversion.", percent(synced, found)));
    }

    if run.actual_cost > 0.0 {
        lines.push(format!("~${:.2} spent.", run.actual_cost));
    }

    let warnings = collect_warnings(run);
    if !warnings.is_empty() {
        lines.push(format!("Warning: {}", warnings.join(" ")));
    }

    lines.join(" ")
}

fn failed_summary(run: &Run) -> String {
    let platform = run.platform.display_name();
    let stage = run.current_stage;
    let progress = run.progress(stage);

    let mut parts = Vec::new();
    if progress.total > 0 && progress.completed > 0 {
        parts.push(format!(
            "{platform} run failed at {} stage after processing {} of {} profiles.",
            stage.label(),
            progress.completed,
            progress.total
        ));
    } else {
        parts.push(format!("{platform} run failed during {}.", stage.label()));
    }

    let mut notes = Vec::new();
    if run.profiles_found > 0 {
        let mut note = format!("discovered {}", run.profiles_found);
        if run.duplicates_skipped > 0 {
            note.push_str(&format!(" ({} duplicates removed)", run.duplicates_skipped));
        }
        notes.push(note);
    }
    if run.profiles_pre_screened > 0 {
        notes.push(format!("{} passed pre-screen", run.profiles_pre_screened));
    }
    if run.profiles_enriched > 0 {
        notes.push(format!("{} enriched", run.profiles_enriched));
    }
    if run.profiles_scored > 0 {
        notes.push(format!("{} scored", run.profiles_scored));
    }
    if !notes.is_empty() {
        parts.push(format!("Before failure: {}.", notes.join(", ")));
    }

    if run.actual_cost > 0.0 {
        parts.push(format!("~${:.2} spent before failure.", run.actual_cost));
    }

    if let Some(error) = run.last_error().filter(|e| !e.is_empty()) {
        parts.push(format!("Error: {error}"));
    }

    parts.join(" ")
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn collect_warnings(run: &Run) -> Vec<String> {
    let found = run.profiles_found;
    let pre = run.profiles_pre_screened;
    let enriched = run.profiles_enriched;
    let scored = run.profiles_scored;
    let estimated = run.estimated_cost;
    let actual = run.actual_cost;

    let mut warnings = Vec::new();

    if found > 0 && pre > 0 {
        let yield_pct = percent(pre, found);
        if yield_pct < LOW_YIELD_PCT {
            warnings.push(format!("Pre-screen yield was low at {yield_pct}%."));
        }
    }

    if pre > 0 && enriched > 0 && (enriched as f64) < pre as f64 * ENRICHMENT_SUCCESS_FLOOR {
        let fail_pct = ((1.0 - enriched as f64 / pre as f64) * 100.0).round() as i64;
        warnings.push(format!("{fail_pct}% of profiles failed enrichment."));
    }

    if scored > 0 && tier_count(run, Tier::AutoEnroll) == 0 {
        warnings.push("No auto-enroll candidates found.".to_string());
    }

    if estimated > 0.0 && actual > estimated * COST_OVERRUN_RATIO {
        let overrun = (((actual - estimated) / estimated) * 100.0).round() as i64;
        warnings.push(format!("Cost exceeded estimate by {overrun}%."));
    }

    if run.contacts_synced == 0 && scored == 0 && run.current_stage != Stage::CrmSync {
        warnings.push(format!(
            "Pipeline stopped after {}, no profiles advanced further.",
            run.current_stage.label()
        ));
    }

    warnings
}

fn tier_count(run: &Run, tier: Tier) -> u64 {
    run.tier_distribution.get(&tier).copied().unwrap_or(0)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn percent(part: u64, whole: u64) -> i64 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_types::run::ProgressOutcome;
    use funnel_types::{Filters, Platform};

    fn finished_run() -> Run {
        let mut run = Run::new(Platform::Instagram, Filters::new());
        run.profiles_found = 100;
        run.duplicates_skipped = 4;
        run.profiles_pre_screened = 80;
        run.profiles_enriched = 80;
        run.profiles_scored = 80;
        run.contacts_synced = 42;
        run.tier_distribution.insert(Tier::AutoEnroll, 8);
        run.tier_distribution.insert(Tier::HighPriorityReview, 18);
        run.estimated_cost = 5.0;
        run.add_cost(4.5);
        run.update_stage(Stage::CrmSync);
        run
    }

    #[test]
    fn test_completed_summary_narrative() {
        let summary = run_summary(&finished_run(), false);
        assert_eq!(
            summary,
            "Discovered 100 Instagram profiles (4 duplicates removed). \
             80 of 100 passed pre-screen (80% yield). \
             42 synced to CRM: 8 auto-enroll, 18 high priority. \
             42% overall conversion. ~$4.50 spent."
        );
    }

    #[test]
    fn test_zero_found_short_form() {
        let run = Run::new(Platform::Patreon, Filters::new());
        assert_eq!(
            run_summary(&run, false),
            "No Patreon profiles found. Check filters and try again."
        );
    }

    #[test]
    fn test_warnings_are_appended() {
        let mut run = finished_run();
        run.profiles_pre_screened = 20;
        run.profiles_enriched = 10;
        run.tier_distribution.insert(Tier::AutoEnroll, 0);
        run.add_cost(2.0);

        let summary = run_summary(&run, false);
        assert!(summary.contains("10 of 20 enriched successfully."), "{summary}");
        assert!(summary.contains("Warning: Pre-screen yield was low at 20%."));
        assert!(summary.contains("50% of profiles failed enrichment."));
        assert!(summary.contains("No auto-enroll candidates found."));
        assert!(summary.contains("Cost exceeded estimate by 30%."));
    }

    #[test]
    fn test_early_stop_warning() {
        let mut run = Run::new(Platform::Facebook, Filters::new());
        run.profiles_found = 10;
        run.update_stage(Stage::PreScreen);
        let summary = run_summary(&run, false);
        assert!(
            summary.ends_with("Warning: Pipeline stopped after pre screen, no profiles advanced further."),
            "{summary}"
        );
    }

    #[test]
    fn test_failed_summary_with_partial_progress() {
        let mut run = Run::new(Platform::Instagram, Filters::new());
        run.profiles_found = 50;
        run.duplicates_skipped = 2;
        run.profiles_pre_screened = 40;
        run.update_stage(Stage::Enrichment);
        run.reset_stage_progress(Stage::Enrichment, 40);
        for _ in 0..12 {
            run.increment_stage_progress(Stage::Enrichment, ProgressOutcome::Completed);
        }
        run.add_cost(1.25);
        run.fail("Stage 'enrichment' failed: upstream down");

        assert_eq!(
            run_summary(&run, true),
            "Instagram run failed at enrichment stage after processing 12 of 40 profiles. \
             Before failure: discovered 50 (2 duplicates removed), 40 passed pre-screen. \
             ~$1.25 spent before failure. \
             Error: Stage 'enrichment' failed: upstream down"
        );
    }

    #[test]
    fn test_failed_summary_without_progress() {
        let mut run = Run::new(Platform::Patreon, Filters::new());
        run.update_stage(Stage::Discovery);
        run.fail("");
        assert_eq!(run_summary(&run, true), "Patreon run failed during discovery.");
    }
}
