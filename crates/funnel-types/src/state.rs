//! Persistence model types.
//!
//! Pure data shared by `StateBackend` implementations and the engine, kept
//! here so neither crate depends on the other for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::RunId;
use crate::stage::Platform;

// ---------------------------------------------------------------------------
// Filter history
// ---------------------------------------------------------------------------

/// Hex SHA-256 of a normalised (platform, filters) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterFingerprint(String);

impl FilterFingerprint {
    #[must_use]
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FilterFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discovery yield observation for a filter fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterHistoryEntry {
    pub fingerprint: FilterFingerprint,
    pub platform: Platform,
    pub run_id: RunId,
    /// Profiles discovered before dedup.
    pub total_found: u64,
    /// Profiles left after dedup.
    pub new_found: u64,
}

impl FilterHistoryEntry {
    /// `new / total`, rounded to three decimals; zero when nothing was found.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn novelty_rate(&self) -> f64 {
        if self.total_found == 0 {
            return 0.0;
        }
        let rate = self.new_found as f64 / self.total_found as f64;
        (rate * 1000.0).round() / 1000.0
    }
}

/// How recently a fingerprint was used and what it yielded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStaleness {
    pub last_used_at: DateTime<Utc>,
    pub days_since_last_run: i64,
    /// Percentage, one decimal.
    pub novelty_pct: f64,
    pub total_found: u64,
    pub new_found: u64,
}

// ---------------------------------------------------------------------------
// Leads
// ---------------------------------------------------------------------------

/// Per-run outcome of one lead, as stored by `persist_lead_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRunRecord {
    pub platform: Platform,
    pub platform_id: String,
    pub run_id: RunId,
    pub stage_reached: crate::stage::Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescreen_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescreen_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<crate::profile::Tier>,
    pub synced_to_crm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(total: u64, new: u64) -> FilterHistoryEntry {
        FilterHistoryEntry {
            fingerprint: FilterFingerprint::new("ab"),
            platform: Platform::Instagram,
            run_id: RunId::new("r"),
            total_found: total,
            new_found: new,
        }
    }

    #[test]
    fn novelty_rate_rounds() {
        assert!((entry(3, 1).novelty_rate() - 0.333).abs() < 1e-9);
        assert!((entry(0, 0).novelty_rate()).abs() < f64::EPSILON);
        assert!((entry(10, 10).novelty_rate() - 1.0).abs() < f64::EPSILON);
    }
}
