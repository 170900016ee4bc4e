use std::path::Path;

use anyhow::{Context, Result};
use funnel_types::filters::{MAX_BUDGET_KEY, MAX_RESULTS_KEY};
use funnel_types::{Filters, Platform};
use serde_json::Value;

use super::{report_outcome, Setup};

/// Arguments of the `run` command.
pub struct RunRequest {
    pub platform: String,
    pub filters: Vec<String>,
    pub max_results: Option<u64>,
    pub max_budget: Option<f64>,
    pub yes: bool,
}

/// Execute the `run` command: pre-flight, confirm, launch and wait.
pub async fn execute(config_path: Option<&Path>, request: RunRequest) -> Result<()> {
    let platform: Platform = request.platform.parse()?;
    let filters = build_filters(&request)?;

    let setup = Setup::load(config_path)?;
    let launcher = setup.launcher()?;

    let preflight = launcher.preflight(platform, &filters)?;
    println!("Platform:        {}", platform.display_name());
    println!("Budget:          ${:.2}", preflight.max_budget);
    println!("Estimated cost:  ${:.2}", preflight.estimated_cost);
    if let Some(stale) = &preflight.staleness {
        println!(
            "Filters last used {} day(s) ago: {} found, {} new ({:.1}% novel)",
            stale.days_since_last_run, stale.total_found, stale.new_found, stale.novelty_pct
        );
    }

    if preflight.needs_confirmation && !request.yes {
        anyhow::bail!(
            "Estimated cost ${:.2} exceeds the confirmation threshold ${:.2}; re-run with --yes to proceed",
            preflight.estimated_cost,
            setup.config.cost.guardrails.confirmation_threshold
        );
    }

    let (run, job) = launcher.launch_run(platform, filters)?;
    println!("Run {} queued.", run.id);

    report_outcome(job.wait().await)
}

fn build_filters(request: &RunRequest) -> Result<Filters> {
    let mut filters = Filters::new();
    for raw in &request.filters {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("Invalid filter '{raw}', expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid filter '{raw}': empty key");
        }
        filters.set(key, parse_value(value.trim()));
    }
    if let Some(n) = request.max_results {
        filters.set(MAX_RESULTS_KEY, n);
    }
    if let Some(budget) = request.max_budget {
        filters.set(MAX_BUDGET_KEY, budget);
    }
    Ok(filters)
}

/// JSON literal when the text parses as one, otherwise a plain string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
