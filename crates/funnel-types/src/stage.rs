//! Pipeline stage, platform and run status enums.
//!
//! The stage order is fixed; every run walks [`Stage::ORDER`] front to back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One named step of the funnel.
///
/// Variants are declared in execution order, so the derived `Ord` matches
/// [`Stage::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    PreScreen,
    Enrichment,
    Analysis,
    Scoring,
    CrmSync,
}

impl Stage {
    /// Fixed execution order.
    pub const ORDER: [Stage; 6] = [
        Stage::Discovery,
        Stage::PreScreen,
        Stage::Enrichment,
        Stage::Analysis,
        Stage::Scoring,
        Stage::CrmSync,
    ];

    /// Wire-format string for storage and filters.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::PreScreen => "pre_screen",
            Self::Enrichment => "enrichment",
            Self::Analysis => "analysis",
            Self::Scoring => "scoring",
            Self::CrmSync => "crm_sync",
        }
    }

    /// Human-readable label used in summaries (`"pre screen"`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::PreScreen => "pre screen",
            Self::Enrichment => "enrichment",
            Self::Analysis => "analysis",
            Self::Scoring => "scoring",
            Self::CrmSync => "crm sync",
        }
    }

    /// Position in [`Stage::ORDER`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The stage executed immediately before this one, if any.
    #[must_use]
    pub fn previous(self) -> Option<Stage> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }

    /// `crm_sync` is the only stage allowed to end with zero profiles
    /// without triggering the early-exit rule.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::CrmSync
    }

    /// Run status reported while this stage executes.
    #[must_use]
    pub fn running_status(self) -> RunStatus {
        match self {
            Self::Discovery => RunStatus::Discovering,
            Self::PreScreen => RunStatus::PreScreening,
            Self::Enrichment => RunStatus::Enriching,
            Self::Analysis => RunStatus::Analyzing,
            Self::Scoring => RunStatus::Scoring,
            Self::CrmSync => RunStatus::Syncing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}', expected one of: discovery, pre_screen, enrichment, analysis, scoring, crm_sync")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Supported candidate data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Patreon,
    Facebook,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Patreon, Platform::Facebook];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Patreon => "patreon",
            Self::Facebook => "facebook",
        }
    }

    /// Capitalized name for summaries and notifications.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Instagram => "Instagram",
            Self::Patreon => "Patreon",
            Self::Facebook => "Facebook",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported platform '{0}', expected one of: instagram, patreon, facebook")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Discovering,
    PreScreening,
    Enriching,
    Analyzing,
    Scoring,
    Syncing,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Discovering => "discovering",
            Self::PreScreening => "pre_screening",
            Self::Enriching => "enriching",
            Self::Analyzing => "analyzing",
            Self::Scoring => "scoring",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_matches_derived_ord() {
        let mut sorted = Stage::ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::ORDER);
        for (i, stage) in Stage::ORDER.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn previous_stage() {
        assert_eq!(Stage::Discovery.previous(), None);
        assert_eq!(Stage::Enrichment.previous(), Some(Stage::PreScreen));
        assert_eq!(Stage::CrmSync.previous(), Some(Stage::Scoring));
    }

    #[test]
    fn stage_serde_uses_snake_case() {
        let json = serde_json::to_string(&Stage::PreScreen).unwrap();
        assert_eq!(json, "\"pre_screen\"");
        let back: Stage = serde_json::from_str("\"crm_sync\"").unwrap();
        assert_eq!(back, Stage::CrmSync);
    }

    #[test]
    fn stage_from_str_roundtrip() {
        for stage in Stage::ORDER {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        let err = "exporting".parse::<Stage>().unwrap_err();
        assert!(err.to_string().contains("exporting"));
    }

    #[test]
    fn running_status_per_stage() {
        assert_eq!(Stage::Discovery.running_status(), RunStatus::Discovering);
        assert_eq!(Stage::CrmSync.running_status(), RunStatus::Syncing);
        assert!(!Stage::Scoring.running_status().is_terminal());
    }

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!("Instagram".parse::<Platform>().unwrap(), Platform::Instagram);
        assert!("tiktok".parse::<Platform>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
    }
}
