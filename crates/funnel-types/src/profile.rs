//! Candidate profile envelope.
//!
//! A [`Profile`] keeps the identity assigned at discovery, the raw source
//! fields, and an ordered list of typed [`Attachment`]s appended by later
//! stages. Attachments are append-only: stages add, never rewrite.
//!
//! Binary payloads and live client handles ride along in
//! [`Profile::ephemeral`], which is never serialized and therefore never
//! reaches a checkpoint.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stage::{Platform, Stage};

/// Coarse priority bucket assigned by the scoring stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    AutoEnroll,
    HighPriorityReview,
    StandardPriorityReview,
    LowPriorityReview,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::AutoEnroll,
        Tier::HighPriorityReview,
        Tier::StandardPriorityReview,
        Tier::LowPriorityReview,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoEnroll => "auto_enroll",
            Self::HighPriorityReview => "high_priority_review",
            Self::StandardPriorityReview => "standard_priority_review",
            Self::LowPriorityReview => "low_priority_review",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTier(s.to_string()))
    }
}

/// Identity fixed at discovery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileIdentity {
    /// Opaque id unique within a run.
    pub id: String,
    pub platform: Platform,
    /// Platform-native unique handle (username, slug, group id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Typed per-stage payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    PreScreen {
        passed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Enrichment {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        website: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        social_urls: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        follower_count: Option<u64>,
    },
    Analysis {
        summary: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        signals: Vec<String>,
    },
    Score {
        #[serde(deserialize_with = "score_or_nan")]
        lead_score: f64,
        tier: Tier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    CrmSync {
        contact_id: String,
    },
    /// Adapter-specific JSON data that has no dedicated variant yet.
    Note {
        stage: Stage,
        key: String,
        value: Value,
    },
}

/// JSON has no NaN or infinity; `serde_json` writes them as `null`.
fn score_or_nan<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl Attachment {
    /// Stage that produces this attachment kind.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::PreScreen { .. } => Stage::PreScreen,
            Self::Enrichment { .. } => Stage::Enrichment,
            Self::Analysis { .. } => Stage::Analysis,
            Self::Score { .. } => Stage::Scoring,
            Self::CrmSync { .. } => Stage::CrmSync,
            Self::Note { stage, .. } => *stage,
        }
    }
}

/// Non-serializable payload carried between stages of one execution.
#[derive(Clone)]
pub enum EphemeralPayload {
    Bytes(Vec<u8>),
    Handle(Arc<dyn Any + Send + Sync>),
}

/// Named ephemeral attachment; dropped at every checkpoint.
#[derive(Clone)]
pub struct Ephemeral {
    pub key: String,
    pub payload: EphemeralPayload,
}

impl fmt::Debug for Ephemeral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.payload {
            EphemeralPayload::Bytes(b) => format!("bytes({})", b.len()),
            EphemeralPayload::Handle(_) => "handle".to_string(),
        };
        f.debug_struct("Ephemeral")
            .field("key", &self.key)
            .field("payload", &kind)
            .finish()
    }
}

/// One candidate moving through the funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub identity: ProfileIdentity,
    /// Raw fields reported by the discovery source.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip)]
    pub ephemeral: Vec<Ephemeral>,
}

impl PartialEq for Profile {
    /// Ephemeral payloads are excluded: two profiles are equal when their
    /// checkpointable content is equal.
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.fields == other.fields
            && self.attachments == other.attachments
    }
}

impl Profile {
    #[must_use]
    pub fn new(id: impl Into<String>, platform: Platform) -> Self {
        Self {
            identity: ProfileIdentity {
                id: id.into(),
                platform,
                handle: None,
                display_name: None,
                url: None,
            },
            fields: Map::new(),
            attachments: Vec::new(),
            ephemeral: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.identity.handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.identity.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.identity.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn attach_ephemeral(&mut self, key: impl Into<String>, payload: EphemeralPayload) {
        self.ephemeral.push(Ephemeral {
            key: key.into(),
            payload,
        });
    }

    /// Key used for cross-run dedup: the platform handle, falling back to the id.
    #[must_use]
    pub fn platform_id(&self) -> &str {
        self.identity
            .handle
            .as_deref()
            .unwrap_or(&self.identity.id)
    }

    /// Latest pre-screen verdict, if the profile was screened.
    #[must_use]
    pub fn pre_screen(&self) -> Option<(bool, Option<&str>)> {
        self.attachments.iter().rev().find_map(|a| match a {
            Attachment::PreScreen { passed, reason } => Some((*passed, reason.as_deref())),
            _ => None,
        })
    }

    /// Latest score and tier, if the profile was scored.
    #[must_use]
    pub fn score(&self) -> Option<(f64, Tier)> {
        self.attachments.iter().rev().find_map(|a| match a {
            Attachment::Score {
                lead_score, tier, ..
            } => Some((*lead_score, *tier)),
            _ => None,
        })
    }

    /// CRM contact id, if the profile was synced.
    #[must_use]
    pub fn crm_contact(&self) -> Option<&str> {
        self.attachments.iter().rev().find_map(|a| match a {
            Attachment::CrmSync { contact_id } => Some(contact_id.as_str()),
            _ => None,
        })
    }

    /// Enrichment email, if any.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.attachments.iter().rev().find_map(|a| match a {
            Attachment::Enrichment { email, .. } => email.as_deref(),
            _ => None,
        })
    }

    /// Follower count from enrichment, else from the raw discovery fields.
    #[must_use]
    pub fn follower_count(&self) -> Option<u64> {
        self.attachments
            .iter()
            .rev()
            .find_map(|a| match a {
                Attachment::Enrichment { follower_count, .. } => *follower_count,
                _ => None,
            })
            .or_else(|| self.fields.get("follower_count").and_then(Value::as_u64))
    }

    /// Furthest stage this profile has an attachment for.
    #[must_use]
    pub fn stage_reached(&self) -> Stage {
        self.attachments
            .iter()
            .map(Attachment::stage)
            .max()
            .unwrap_or(Stage::Discovery)
    }
}
