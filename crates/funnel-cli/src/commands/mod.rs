//! Subcommand implementations and the wiring they share.

pub mod breakers;
pub mod pipeline_info;
pub mod retry;
pub mod run;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use funnel_engine::config::{parse_config, validate_config};
use funnel_engine::{
    simulated_registry, BreakerRegistry, Launcher, PipelineConfig, PipelineContext, PipelineError,
};
use funnel_state::SqliteStateBackend;
use funnel_types::{Run, RunStatus};

/// Everything a subcommand needs, built from one config file.
pub struct Setup {
    pub config: PipelineConfig,
    pub breakers: BreakerRegistry,
    pub context: PipelineContext,
}

impl Setup {
    /// Parse and validate the config, open the state database and build the
    /// adapter registry.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => parse_config(path)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        validate_config(&config)?;

        if !config.simulated {
            anyhow::bail!(
                "live adapters are not bundled with this build; set `simulated: true` in the config"
            );
        }

        let state = Arc::new(
            SqliteStateBackend::open(&config.state.path).with_context(|| {
                format!("Failed to open state database: {}", config.state.path.display())
            })?,
        );
        let breakers = BreakerRegistry::from_config(&config, state.clone());
        let registry = simulated_registry(&config.cost, &breakers);
        let context = PipelineContext::new(registry, state).with_cost(config.cost.clone());

        tracing::debug!(
            state_path = %config.state.path.display(),
            breakers = config.breaker_services().len(),
            "Funnel configured"
        );

        Ok(Self {
            config,
            breakers,
            context,
        })
    }

    pub fn launcher(&self) -> Result<Launcher> {
        Ok(Launcher::new(self.context.clone(), self.config.job_timeout())?)
    }
}

/// Print the outcome of a finished job; errors for failed runs.
pub fn report_outcome(result: Result<Run, PipelineError>) -> Result<()> {
    let run = result?;
    println!("Run {} {}.", run.id, run.status);
    if !run.summary.is_empty() {
        println!("  {}", run.summary);
    }
    println!("  Found:           {}", run.profiles_found);
    println!("  Pre-screened:    {}", run.profiles_pre_screened);
    println!("  Enriched:        {}", run.profiles_enriched);
    println!("  Scored:          {}", run.profiles_scored);
    println!("  Synced:          {}", run.contacts_synced);
    println!("  Dupes skipped:   {}", run.duplicates_skipped);
    println!(
        "  Cost:            ${:.2} (estimated ${:.2})",
        run.actual_cost, run.estimated_cost
    );

    if run.status == RunStatus::Failed {
        anyhow::bail!(
            "Run {} failed: {}",
            run.id,
            run.last_error().unwrap_or("unknown error")
        );
    }
    Ok(())
}
