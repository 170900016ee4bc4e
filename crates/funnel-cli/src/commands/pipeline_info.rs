use std::path::Path;

use anyhow::Result;

use super::Setup;

/// Execute the `pipeline-info` command: adapter metadata as JSON.
pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let setup = Setup::load(config_path)?;
    let info = setup.context.registry.pipeline_info();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
