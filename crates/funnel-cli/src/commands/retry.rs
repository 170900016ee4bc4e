use std::path::Path;

use anyhow::Result;
use funnel_types::RunId;

use super::{report_outcome, Setup};

/// Execute the `retry` command: resume a previous run at `from_stage`.
pub async fn execute(config_path: Option<&Path>, run_id: &str, from_stage: &str) -> Result<()> {
    let setup = Setup::load(config_path)?;
    let launcher = setup.launcher()?;

    let (run, job) = launcher.retry_run(&RunId::new(run_id), from_stage)?;
    println!("Retry run {} queued (parent {run_id}, from {from_stage}).", run.id);

    report_outcome(job.wait().await)
}
