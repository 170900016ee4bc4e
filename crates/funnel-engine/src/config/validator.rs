//! Semantic validation for parsed funnel configuration values.

use anyhow::{bail, Result};

use crate::config::types::{CostConfig, PipelineConfig};

fn validate_amount(value: f64, context: &str, errors: &mut Vec<String>) {
    if !value.is_finite() || value < 0.0 {
        errors.push(format!("{context} must be a non-negative amount, got {value}"));
    }
}

fn validate_cost(cost: &CostConfig, errors: &mut Vec<String>) {
    for (platform, defaults) in &cost.defaults {
        validate_amount(
            defaults.max_budget,
            &format!("cost.defaults.{platform}.max_budget"),
            errors,
        );
        let t = defaults.warning_threshold;
        if !(t > 0.0 && t <= 1.0) {
            errors.push(format!(
                "cost.defaults.{platform}.warning_threshold must be in (0, 1], got {t}"
            ));
        }
        if defaults.max_budget > cost.guardrails.absolute_max {
            errors.push(format!(
                "cost.defaults.{platform}.max_budget ({:.2}) exceeds guardrails.absolute_max ({:.2})",
                defaults.max_budget, cost.guardrails.absolute_max
            ));
        }
    }

    for (platform, stages) in &cost.rates {
        for (stage, rate) in stages {
            validate_amount(*rate, &format!("cost.rates.{platform}.{stage}"), errors);
        }
    }

    validate_amount(
        cost.guardrails.confirmation_threshold,
        "cost.guardrails.confirmation_threshold",
        errors,
    );
    validate_amount(
        cost.guardrails.absolute_max,
        "cost.guardrails.absolute_max",
        errors,
    );
}

/// Validate a parsed funnel configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.state.path.as_os_str().is_empty() {
        errors.push("state.path must not be empty".to_string());
    }

    if config.job_timeout_secs == 0 {
        errors.push("job_timeout_secs must be > 0".to_string());
    }

    validate_cost(&config.cost, &mut errors);

    for (service, settings) in &config.breakers {
        if service.trim().is_empty() {
            errors.push("breaker service name must not be empty".to_string());
        }
        if settings.failure_threshold == 0 {
            errors.push(format!("breakers.{service}.failure_threshold must be at least 1"));
        }
        if settings.reset_timeout_secs == 0 {
            errors.push(format!("breakers.{service}.reset_timeout_secs must be > 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    #[test]
    fn test_default_config_passes() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let config = parse_config_str("version: \"2.0\"\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
    }

    #[test]
    fn test_zero_job_timeout_fails() {
        let config = parse_config_str("version: \"1.0\"\njob_timeout_secs: 0\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("job_timeout_secs must be > 0"));
    }

    #[test]
    fn test_bad_breaker_settings_fail() {
        let yaml = r#"
version: "1.0"
breakers:
  openai: { failure_threshold: 0, reset_timeout_secs: 0 }
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("breakers.openai.failure_threshold"));
        assert!(err.contains("breakers.openai.reset_timeout_secs"));
    }

    #[test]
    fn test_warning_threshold_out_of_range_fails() {
        let yaml = r#"
version: "1.0"
cost:
  defaults:
    patreon: { max_budget: 10.0, warning_threshold: 1.5 }
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("warning_threshold must be in (0, 1]"));
    }

    #[test]
    fn test_budget_above_absolute_max_fails() {
        let yaml = r#"
version: "1.0"
cost:
  defaults:
    instagram: { max_budget: 500.0 }
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("exceeds guardrails.absolute_max"));
    }

    #[test]
    fn test_negative_rate_fails() {
        let yaml = r#"
version: "1.0"
cost:
  rates:
    facebook: { analysis: -0.1 }
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("cost.rates.facebook.analysis"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = r#"
version: "0.9"
job_timeout_secs: 0
breakers:
  apify: { failure_threshold: 0, reset_timeout_secs: 10 }
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert_eq!(err.matches("\n  - ").count(), 3, "got: {err}");
    }
}
