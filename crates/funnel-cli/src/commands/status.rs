use std::path::Path;

use anyhow::Result;
use funnel_types::RunId;

use super::Setup;

/// Execute the `status` command: print the run's status view as JSON.
pub fn execute(config_path: Option<&Path>, run_id: &str) -> Result<()> {
    let setup = Setup::load(config_path)?;
    let launcher = setup.launcher()?;

    let Some(view) = launcher.run_status(&RunId::new(run_id))? else {
        anyhow::bail!("Run {run_id} not found");
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
