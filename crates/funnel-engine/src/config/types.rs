//! Configuration model for `funnel.yaml`.
//!
//! Every section is optional; absent sections take the built-in defaults
//! below. Lookups fall back per key, so a file that configures one
//! platform or one breaker still gets defaults for the rest.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use funnel_types::{Platform, Stage};
use serde::{Deserialize, Serialize};

pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 14_400;
const DEFAULT_STATE_PATH: &str = ".funnel/state.db";
const FALLBACK_BUDGET: f64 = 50.0;
const FALLBACK_WARNING_THRESHOLD: f64 = 0.8;
const FALLBACK_FAILURE_THRESHOLD: u32 = 5;
const FALLBACK_RESET_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    #[serde(default)]
    pub state: StateConfig,
    /// Use the simulated adapter set instead of live integrations.
    #[serde(default = "default_simulated")]
    pub simulated: bool,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerSettings>,
}

fn default_simulated() -> bool {
    true
}

fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            state: StateConfig::default(),
            simulated: default_simulated(),
            job_timeout_secs: default_job_timeout_secs(),
            cost: CostConfig::default(),
            breakers: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Configured settings for `service`, else the built-in table, else a
    /// generic 5 failures / 60 s.
    #[must_use]
    pub fn breaker_settings(&self, service: &str) -> BreakerSettings {
        self.breakers
            .get(service)
            .copied()
            .or_else(|| builtin_breaker(service))
            .unwrap_or(BreakerSettings {
                failure_threshold: FALLBACK_FAILURE_THRESHOLD,
                reset_timeout_secs: FALLBACK_RESET_TIMEOUT_SECS,
            })
    }

    /// Every service with settings, configured or built in.
    #[must_use]
    pub fn breaker_services(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_BREAKERS
            .iter()
            .map(|(name, _, _)| (*name).to_string())
            .collect();
        for name in self.breakers.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetDefaults {
    pub max_budget: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_warning_threshold() -> f64 {
    FALLBACK_WARNING_THRESHOLD
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Guardrails {
    /// Pre-flight estimates above this need explicit confirmation.
    pub confirmation_threshold: f64,
    /// Hard ceiling on any requested budget.
    pub absolute_max: f64,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            confirmation_threshold: 10.0,
            absolute_max: 200.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "builtin_defaults")]
    pub defaults: BTreeMap<Platform, BudgetDefaults>,
    /// Dollars per profile, per platform and stage.
    #[serde(default = "builtin_rates")]
    pub rates: BTreeMap<Platform, BTreeMap<Stage, f64>>,
    #[serde(default)]
    pub guardrails: Guardrails,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            defaults: builtin_defaults(),
            rates: builtin_rates(),
            guardrails: Guardrails::default(),
        }
    }
}

impl CostConfig {
    #[must_use]
    pub fn default_budget(&self, platform: Platform) -> f64 {
        self.budget_defaults(platform).max_budget
    }

    #[must_use]
    pub fn warning_threshold(&self, platform: Platform) -> f64 {
        self.budget_defaults(platform).warning_threshold
    }

    fn budget_defaults(&self, platform: Platform) -> BudgetDefaults {
        self.defaults
            .get(&platform)
            .copied()
            .or_else(|| builtin_defaults().get(&platform).copied())
            .unwrap_or(BudgetDefaults {
                max_budget: FALLBACK_BUDGET,
                warning_threshold: FALLBACK_WARNING_THRESHOLD,
            })
    }

    /// Per-profile rate; zero for stages with no configured rate.
    #[must_use]
    pub fn rate(&self, platform: Platform, stage: Stage) -> f64 {
        self.rates
            .get(&platform)
            .and_then(|stages| stages.get(&stage))
            .copied()
            .unwrap_or(0.0)
    }
}

fn builtin_defaults() -> BTreeMap<Platform, BudgetDefaults> {
    [
        (Platform::Instagram, 50.0),
        (Platform::Patreon, 20.0),
        (Platform::Facebook, 20.0),
    ]
    .into_iter()
    .map(|(p, max_budget)| {
        (
            p,
            BudgetDefaults {
                max_budget,
                warning_threshold: FALLBACK_WARNING_THRESHOLD,
            },
        )
    })
    .collect()
}

fn builtin_rates() -> BTreeMap<Platform, BTreeMap<Stage, f64>> {
    let instagram = [
        (Stage::Discovery, 0.02),
        (Stage::PreScreen, 0.05),
        (Stage::Analysis, 0.15),
        (Stage::Scoring, 0.02),
    ];
    let directory = [
        (Stage::Discovery, 0.01),
        (Stage::Enrichment, 0.05),
        (Stage::Analysis, 0.10),
        (Stage::Scoring, 0.02),
    ];
    BTreeMap::from([
        (Platform::Instagram, instagram.into_iter().collect()),
        (Platform::Patreon, directory.into_iter().collect()),
        (Platform::Facebook, directory.into_iter().collect()),
    ])
}

// ---------------------------------------------------------------------------
// Circuit breakers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl BreakerSettings {
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// (service, failure threshold, reset timeout seconds)
const BUILTIN_BREAKERS: [(&str, u32, u64); 6] = [
    ("insightiq", 3, 300),
    ("openai", 5, 60),
    ("apify", 3, 300),
    ("hubspot", 3, 180),
    ("apollo", 5, 120),
    ("anthropic", 5, 60),
];

fn builtin_breaker(service: &str) -> Option<BreakerSettings> {
    BUILTIN_BREAKERS
        .iter()
        .find(|(name, _, _)| *name == service)
        .map(|&(_, failure_threshold, reset_timeout_secs)| BreakerSettings {
            failure_threshold,
            reset_timeout_secs,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_cost_defaults() {
        let cost = CostConfig::default();
        assert!((cost.default_budget(Platform::Instagram) - 50.0).abs() < f64::EPSILON);
        assert!((cost.default_budget(Platform::Patreon) - 20.0).abs() < f64::EPSILON);
        assert!((cost.warning_threshold(Platform::Facebook) - 0.8).abs() < f64::EPSILON);
        assert!((cost.rate(Platform::Instagram, Stage::Analysis) - 0.15).abs() < f64::EPSILON);
        assert!(cost.rate(Platform::Instagram, Stage::Enrichment).abs() < f64::EPSILON);
        assert!(cost.rate(Platform::Patreon, Stage::CrmSync).abs() < f64::EPSILON);
    }

    #[test]
    fn test_breaker_settings_fallback_chain() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.breaker_settings("insightiq").failure_threshold, 3);
        assert_eq!(config.breaker_settings("hubspot").reset_timeout_secs, 180);
        assert_eq!(config.breaker_settings("unknown").failure_threshold, 5);

        config.breakers.insert(
            "insightiq".into(),
            BreakerSettings {
                failure_threshold: 9,
                reset_timeout_secs: 1,
            },
        );
        assert_eq!(config.breaker_settings("insightiq").failure_threshold, 9);
    }

    #[test]
    fn test_breaker_services_include_configured() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.breaker_services().len(), 6);
        config.breakers.insert(
            "clearbit".into(),
            BreakerSettings {
                failure_threshold: 2,
                reset_timeout_secs: 30,
            },
        );
        assert!(config.breaker_services().contains(&"clearbit".to_string()));
    }
}
