use std::path::Path;

use anyhow::Result;

use super::Setup;

/// Execute the `breakers` command: one line per service.
pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let setup = Setup::load(config_path)?;

    println!(
        "{:12} {:10} {:>9} {:>8} {:>9}  LAST ERROR",
        "SERVICE", "STATE", "FAILURES", "SUCCESS", "FAILED"
    );
    for health in setup.breakers.health() {
        let failures = format!("{}/{}", health.failure_count, health.failure_threshold);
        let state = if health.available {
            health.state.to_string()
        } else {
            format!("{}?", health.state)
        };
        println!(
            "{:12} {:10} {:>9} {:>8} {:>9}  {}",
            health.name,
            state,
            failures,
            health.total_success,
            health.total_failure,
            health.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Execute the `breaker-reset` command.
pub fn reset(config_path: Option<&Path>, service: &str) -> Result<()> {
    let setup = Setup::load(config_path)?;
    let Some(breaker) = setup.breakers.get(service) else {
        let known: Vec<String> = setup.breakers.health().into_iter().map(|h| h.name).collect();
        anyhow::bail!("Unknown service '{service}', expected one of: {}", known.join(", "));
    };
    breaker.reset()?;
    println!("Circuit breaker '{service}' reset to closed.");
    Ok(())
}
