//! Cost admission control.
//!
//! [`check_admission`] runs before every stage. It is a pre-flight check on
//! the adapter's estimate, not a cap enforced while the stage runs.

use funnel_types::{Filters, Platform, Run, Stage};

use crate::config::{CostConfig, Guardrails};
use crate::registry::StageRegistry;

/// Funnel shrinkage applied by the pre-flight estimate after each stage.
const RETENTION_AFTER_DISCOVERY: f64 = 0.7;
const RETENTION_AFTER_PRE_SCREEN: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Proceed,
    /// Over the warning ratio; the stage still runs.
    Warn(String),
    /// Spend plus estimate exceeds the budget; the run must stop.
    Reject(String),
}

/// Decide whether the next stage may start.
///
/// Only applies when the filters carry a positive `max_budget` and the run
/// has already spent something.
pub fn check_admission(run: &Run, estimate: f64, warning_threshold: f64) -> Admission {
    let Some(max_budget) = run.filters.max_budget().filter(|b| *b > 0.0) else {
        return Admission::Proceed;
    };
    if run.actual_cost <= 0.0 {
        return Admission::Proceed;
    }

    let projected = run.actual_cost + estimate;
    if projected > max_budget {
        return Admission::Reject(format!(
            "Budget limit ${max_budget:.2} would be exceeded (spent ${:.2}, next stage ~${estimate:.2})",
            run.actual_cost
        ));
    }

    if projected > max_budget * warning_threshold {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pct = (warning_threshold * 100.0) as u32;
        return Admission::Warn(format!(
            "Cost at {pct}%+ of budget (${projected:.2} / ${max_budget:.2})"
        ));
    }

    Admission::Proceed
}

/// Whole-pipeline estimate before any stage runs.
///
/// Starts from `filters.max_results` and shrinks the count after discovery
/// and pre-screen. Rounded to cents.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn estimate_total_cost(registry: &StageRegistry, platform: Platform, filters: &Filters) -> f64 {
    let mut count = filters.max_results();
    let mut total = 0.0;

    for stage in Stage::ORDER {
        let Ok(adapter) = registry.resolve(stage, platform) else {
            continue;
        };
        total += adapter.estimate_cost(count);
        match stage {
            Stage::Discovery => count = (count as f64 * RETENTION_AFTER_DISCOVERY) as u64,
            Stage::PreScreen => count = (count as f64 * RETENTION_AFTER_PRE_SCREEN) as u64,
            _ => {}
        }
    }

    (total * 100.0).round() / 100.0
}

/// Whether a pre-flight estimate must be confirmed by the operator.
pub fn needs_confirmation(estimate: f64, guardrails: &Guardrails) -> bool {
    estimate > guardrails.confirmation_threshold
}

/// Fill in the platform default budget when absent and clamp any budget to
/// the absolute maximum. Returns the effective budget.
pub fn apply_budget_defaults(filters: &mut Filters, platform: Platform, cost: &CostConfig) -> f64 {
    let requested = filters
        .max_budget()
        .unwrap_or_else(|| cost.default_budget(platform));
    let effective = requested.min(cost.guardrails.absolute_max);
    if effective < requested {
        tracing::warn!(
            platform = %platform,
            requested,
            absolute_max = cost.guardrails.absolute_max,
            "Requested budget clamped"
        );
    }
    filters.set_max_budget(effective);
    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(budget: Option<f64>, spent: f64) -> Run {
        let mut filters = Filters::new();
        if let Some(b) = budget {
            filters.set_max_budget(b);
        }
        let mut run = Run::new(Platform::Instagram, filters);
        run.add_cost(spent);
        run
    }

    #[test]
    fn test_rejects_when_projection_exceeds_budget() {
        let run = run_with(Some(1.00), 0.96);
        match check_admission(&run, 0.05, 0.8) {
            Admission::Reject(msg) => {
                assert!(msg.contains("Budget limit $1.00"), "got: {msg}");
                assert!(msg.contains("spent $0.96"));
                assert!(msg.contains("~$0.05"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_no_budget_or_no_spend_proceeds() {
        assert_eq!(check_admission(&run_with(None, 5.0), 100.0, 0.8), Admission::Proceed);
        assert_eq!(check_admission(&run_with(Some(1.0), 0.0), 100.0, 0.8), Admission::Proceed);
        assert_eq!(check_admission(&run_with(Some(0.0), 3.0), 100.0, 0.8), Admission::Proceed);
    }

    #[test]
    fn test_warns_above_threshold() {
        let run = run_with(Some(10.0), 7.0);
        match check_admission(&run, 1.5, 0.8) {
            Admission::Warn(msg) => assert_eq!(msg, "Cost at 80%+ of budget ($8.50 / $10.00)"),
            other => panic!("expected warning, got {other:?}"),
        }
        assert_eq!(check_admission(&run, 0.5, 0.8), Admission::Proceed);
    }

    #[test]
    fn test_confirmation_threshold() {
        let guardrails = Guardrails::default();
        assert!(!needs_confirmation(10.0, &guardrails));
        assert!(needs_confirmation(10.01, &guardrails));
    }

    #[test]
    fn test_budget_defaults_and_clamp() {
        let cost = CostConfig::default();

        let mut empty = Filters::new();
        assert!((apply_budget_defaults(&mut empty, Platform::Patreon, &cost) - 20.0).abs() < 1e-9);
        assert_eq!(empty.max_budget(), Some(20.0));

        let mut greedy = Filters::new().with("max_budget", 1_000.0);
        assert!((apply_budget_defaults(&mut greedy, Platform::Instagram, &cost) - 200.0).abs() < 1e-9);
        assert_eq!(greedy.max_budget(), Some(200.0));

        let mut modest = Filters::new().with("max_budget", "12.5");
        assert!((apply_budget_defaults(&mut modest, Platform::Facebook, &cost) - 12.5).abs() < 1e-9);
    }
}
