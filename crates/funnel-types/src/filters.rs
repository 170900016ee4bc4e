//! Opaque run filters.
//!
//! Filters are adapter-defined JSON. The engine reads only the budget, the
//! result-count hint and the retry markers written by the retry launcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stage::Stage;

pub const MAX_BUDGET_KEY: &str = "max_budget";
pub const MAX_RESULTS_KEY: &str = "max_results";
pub const RETRY_FROM_KEY: &str = "_retry_from";
pub const PARENT_RUN_KEY: &str = "_parent_run_id";

/// Result count assumed by the pre-flight estimate when filters carry none.
pub const DEFAULT_MAX_RESULTS: u64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(Map<String, Value>);

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Budget ceiling in dollars; accepts numbers and numeric strings.
    #[must_use]
    pub fn max_budget(&self) -> Option<f64> {
        match self.0.get(MAX_BUDGET_KEY)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_max_budget(&mut self, budget: f64) {
        self.set(MAX_BUDGET_KEY, budget);
    }

    #[must_use]
    pub fn max_results(&self) -> u64 {
        match self.0.get(MAX_RESULTS_KEY) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_MAX_RESULTS),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_MAX_RESULTS),
            _ => DEFAULT_MAX_RESULTS,
        }
    }

    /// Resume stage written by the retry launcher. Unknown names read as `None`.
    #[must_use]
    pub fn retry_from(&self) -> Option<Stage> {
        self.0
            .get(RETRY_FROM_KEY)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    #[must_use]
    pub fn parent_run_id(&self) -> Option<&str> {
        self.0.get(PARENT_RUN_KEY).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Filters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
