//! Funnel YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a funnel YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse funnel YAML")?;
    Ok(config)
}

/// Parse a funnel YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_types::{Platform, Stage};

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FUNNEL_TEST_DB", "/var/lib/funnel/state.db");
        let input = "state:\n  path: ${FUNNEL_TEST_DB}";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("/var/lib/funnel/state.db"));
        assert!(!result.contains("${FUNNEL_TEST_DB}"));
        std::env::remove_var("FUNNEL_TEST_DB");
    }

    #[test]
    fn test_repeated_env_var() {
        std::env::set_var("FUNNEL_TEST_A", "alpha");
        let result = substitute_env_vars("${FUNNEL_TEST_A} and ${FUNNEL_TEST_A}").unwrap();
        assert_eq!(result, "alpha and alpha");
        std::env::remove_var("FUNNEL_TEST_A");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "version: \"1.0\"\nsimulated: true";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let result = substitute_env_vars("${FUNNEL_MISSING_X} and ${FUNNEL_MISSING_Y}");
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("FUNNEL_MISSING_X"));
        assert!(err_msg.contains("FUNNEL_MISSING_Y"));
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = parse_config_str("version: \"1.0\"\n").unwrap();
        assert!(config.simulated);
        assert_eq!(config.job_timeout_secs, 14_400);
        assert!((config.cost.default_budget(Platform::Instagram) - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.breaker_settings("openai").failure_threshold, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
version: "1.0"
state:
  path: /tmp/funnel/state.db
simulated: false
job_timeout_secs: 600
cost:
  defaults:
    instagram: { max_budget: 75.0, warning_threshold: 0.9 }
  rates:
    instagram: { discovery: 0.03, pre_screen: 0.04 }
  guardrails: { confirmation_threshold: 5.0, absolute_max: 100.0 }
breakers:
  insightiq: { failure_threshold: 2, reset_timeout_secs: 30 }
"#;
        let config = parse_config_str(yaml).unwrap();
        assert!(!config.simulated);
        assert_eq!(config.job_timeout_secs, 600);
        assert_eq!(config.state.path, std::path::PathBuf::from("/tmp/funnel/state.db"));
        assert!((config.cost.default_budget(Platform::Instagram) - 75.0).abs() < f64::EPSILON);
        // Unlisted platforms keep the built-in budget.
        assert!((config.cost.default_budget(Platform::Patreon) - 20.0).abs() < f64::EPSILON);
        assert!((config.cost.rate(Platform::Instagram, Stage::Discovery) - 0.03).abs() < f64::EPSILON);
        assert!((config.cost.guardrails.absolute_max - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.breaker_settings("insightiq").reset_timeout_secs, 30);
    }

    #[test]
    fn test_parse_unknown_platform_errors() {
        let yaml = "version: \"1.0\"\ncost:\n  defaults:\n    tiktok: { max_budget: 1.0 }\n";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        assert!(parse_config_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funnel.yaml");
        std::fs::write(&path, "version: \"1.0\"\njob_timeout_secs: 30\n").unwrap();
        assert_eq!(parse_config(&path).unwrap().job_timeout_secs, 30);

        let err = parse_config(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
