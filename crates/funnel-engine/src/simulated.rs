//! Simulated adapter set for demos and tests.
//!
//! Every (stage, platform) pair gets a [`SimulatedAdapter`]. Outcomes are
//! derived from SHA-256 buckets of the profile id, so the same filters
//! always produce the same funnel. Costs come from the configured rates.

use std::collections::BTreeMap;
use std::sync::Arc;

use funnel_types::error::AdapterError;
use funnel_types::profile::{Attachment, EphemeralPayload};
use funnel_types::run::ProgressOutcome;
use funnel_types::{Platform, Profile, Stage, StageResult, Tier};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::adapter::{AdapterInfo, StageAdapter, StageContext};
use crate::circuit_breaker::{BreakerRegistry, CircuitBreaker};
use crate::config::CostConfig;
use crate::errors::{with_retry, RetryPolicy};
use crate::fingerprint::filter_fingerprint;
use crate::registry::StageRegistry;

/// Percent of profiles that pass pre-screen.
const PRE_SCREEN_PASS_PCT: u64 = 80;
/// Percent of enrichment lookups that find nothing.
const ENRICHMENT_MISS_PCT: u64 = 5;
/// External service the enrichment stage calls through its breaker.
pub const ENRICHMENT_SERVICE: &str = "insightiq";

const HANDLES: [&str; 10] = [
    "wanderlust_maya",
    "fit_with_jorge",
    "chef_nomad_li",
    "yoga_with_priya",
    "adventure_alex",
    "sarah_creates",
    "digital_nomad_dan",
    "surf_coach_kai",
    "photo_walks_emma",
    "eco_travel_zoe",
];

/// Register a simulated adapter for every stage and platform.
pub fn simulated_registry(cost: &CostConfig, breakers: &BreakerRegistry) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for stage in Stage::ORDER {
        for platform in Platform::ALL {
            let breaker = (stage == Stage::Enrichment)
                .then(|| breakers.get(ENRICHMENT_SERVICE).cloned())
                .flatten();
            registry.register(
                stage,
                platform,
                Arc::new(SimulatedAdapter {
                    stage,
                    platform,
                    rate: cost.rate(platform, stage),
                    breaker,
                }),
            );
        }
    }
    registry
}

/// Deterministic stand-in for one live adapter.
pub struct SimulatedAdapter {
    stage: Stage,
    platform: Platform,
    /// Dollars per input profile.
    rate: f64,
    breaker: Option<CircuitBreaker>,
}

impl SimulatedAdapter {
    #[must_use]
    pub fn new(stage: Stage, platform: Platform, rate: f64) -> Self {
        Self {
            stage,
            platform,
            rate,
            breaker: None,
        }
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn cost_for(&self, count: usize) -> f64 {
        self.rate * count as f64
    }

    fn discover(&self, ctx: &mut StageContext<'_>) -> StageResult {
        let seed = filter_fingerprint(self.platform, ctx.filters());
        let count = ctx.filters().max_results();
        let profiles: Vec<Profile> = (0..count)
            .map(|i| {
                let key = format!("{seed}:{i}");
                let h = bucket(&[key.as_str()]);
                #[allow(clippy::cast_possible_truncation)]
                let stem = HANDLES[(h % HANDLES.len() as u64) as usize];
                let handle = format!("{stem}_{:06x}", h & 0x00ff_ffff);
                Profile::new(format!("sim-{}", &bucket_hex(&[key.as_str()])[..12]), self.platform)
                    .with_url(format!("https://{}.example/{handle}", self.platform))
                    .with_display_name(stem.replace('_', " "))
                    .with_handle(handle)
                    .with_field("follower_count", 1_000 + h % 200_000)
            })
            .collect();

        for _ in &profiles {
            ctx.increment_progress(ProgressOutcome::Completed);
        }
        let mut result = StageResult::new(profiles);
        result.processed = result.profiles.len() as u64;
        result.cost = self.cost_for(result.profiles.len());
        result
    }

    fn pre_screen(&self, profiles: Vec<Profile>, ctx: &mut StageContext<'_>) -> StageResult {
        let processed = profiles.len();
        let mut passed = Vec::new();
        let mut rejected = 0;
        for mut profile in profiles {
            if bucket(&[profile.identity.id.as_str(), "pre_screen"]) % 100 < PRE_SCREEN_PASS_PCT {
                profile.attach(Attachment::PreScreen {
                    passed: true,
                    reason: Some("Active content, good engagement".to_string()),
                });
                if self.platform == Platform::Instagram {
                    profile.attach_ephemeral("content_items", EphemeralPayload::Bytes(vec![0; 64]));
                }
                passed.push(profile);
                ctx.increment_progress(ProgressOutcome::Completed);
            } else {
                rejected += 1;
                ctx.increment_progress(ProgressOutcome::Failed);
            }
        }
        let mut result = StageResult::new(passed);
        result.processed = processed as u64;
        result.failed = rejected;
        result.cost = self.cost_for(processed);
        result
    }

    fn enrich(
        &self,
        profiles: Vec<Profile>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageResult, AdapterError> {
        let processed = profiles.len();
        let mut result = StageResult::new(Vec::with_capacity(processed));
        for mut profile in profiles {
            let lookup = with_retry(RetryPolicy::default(), |_| match &self.breaker {
                Some(breaker) => breaker.call(|| lookup_contact(&profile)).map_err(AdapterError::from),
                None => lookup_contact(&profile),
            });
            match lookup {
                Ok(attachment) => {
                    profile.attach(attachment);
                    result.profiles.push(profile);
                    ctx.increment_progress(ProgressOutcome::Completed);
                }
                Err(e) if e.is_circuit_open() => return Err(e),
                Err(e) => {
                    result.record_failure(format!("{}: {e}", profile.platform_id()));
                    ctx.increment_progress(ProgressOutcome::Failed);
                }
            }
        }
        result.processed = processed as u64;
        result.cost = self.cost_for(processed);
        Ok(result)
    }

    fn analyze(&self, mut profiles: Vec<Profile>, ctx: &mut StageContext<'_>) -> StageResult {
        for profile in &mut profiles {
            let h = bucket(&[profile.identity.id.as_str(), "analysis"]);
            let mut signals = Vec::new();
            if h % 5 < 2 {
                signals.push("in_person_events".to_string());
            }
            if (h / 5) % 2 == 0 {
                signals.push("community_platform".to_string());
            }
            if (h / 10) % 5 < 3 {
                signals.push("monetization".to_string());
            }
            profile.attach(Attachment::Analysis {
                summary: format!("Simulated {} content review", self.platform.display_name()),
                signals,
            });
            ctx.increment_progress(ProgressOutcome::Completed);
        }
        let mut result = StageResult::new(profiles);
        result.processed = result.profiles.len() as u64;
        result.cost = self.cost_for(result.profiles.len());
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, mut profiles: Vec<Profile>, ctx: &mut StageContext<'_>) -> StageResult {
        for profile in &mut profiles {
            let unit = (bucket(&[profile.identity.id.as_str(), "scoring"]) % 1000) as f64 / 1000.0;
            let lead_score = ((0.3 + unit * 0.65) * 1000.0).round() / 1000.0;
            profile.attach(Attachment::Score {
                lead_score,
                tier: tier_for(lead_score),
                reasoning: Some("Simulated score".to_string()),
            });
            ctx.increment_progress(ProgressOutcome::Completed);
        }
        let mut result = StageResult::new(profiles);
        result.processed = result.profiles.len() as u64;
        result.cost = self.cost_for(result.profiles.len());
        result
    }

    fn sync(&self, mut profiles: Vec<Profile>, ctx: &mut StageContext<'_>) -> StageResult {
        for profile in &mut profiles {
            let contact_id = format!("sim-contact-{}", &bucket_hex(&[profile.identity.id.as_str(), "crm"])[..10]);
            profile.attach(Attachment::CrmSync { contact_id });
            ctx.increment_progress(ProgressOutcome::Completed);
        }
        let mut result = StageResult::new(profiles);
        result.processed = result.profiles.len() as u64;
        result.meta.insert("crm".to_string(), json!("simulated"));
        result
    }
}

impl StageAdapter for SimulatedAdapter {
    fn info(&self) -> AdapterInfo {
        let apis: &[&str] = match self.stage {
            Stage::Enrichment => &[ENRICHMENT_SERVICE],
            Stage::CrmSync => &["hubspot"],
            _ => &["simulated"],
        };
        AdapterInfo::new(
            format!("Simulated {} {}", self.platform.display_name(), self.stage.label()),
            apis,
            0.0,
        )
    }

    fn run(
        &self,
        profiles: Vec<Profile>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageResult, AdapterError> {
        Ok(match self.stage {
            Stage::Discovery => self.discover(ctx),
            Stage::PreScreen => self.pre_screen(profiles, ctx),
            Stage::Enrichment => return self.enrich(profiles, ctx),
            Stage::Analysis => self.analyze(profiles, ctx),
            Stage::Scoring => self.score(profiles, ctx),
            Stage::CrmSync => self.sync(profiles, ctx),
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn estimate_cost(&self, count: u64) -> f64 {
        self.rate * count as f64
    }
}

/// Simulated contact lookup; a fixed share of profiles is unknown upstream.
fn lookup_contact(profile: &Profile) -> Result<Attachment, AdapterError> {
    let h = bucket(&[profile.identity.id.as_str(), "enrichment"]);
    if h % 100 < ENRICHMENT_MISS_PCT {
        return Err(AdapterError::permanent(
            ENRICHMENT_SERVICE,
            "NOT_FOUND",
            "no social profile matched",
        ));
    }
    let handle = profile.platform_id();
    Ok(Attachment::Enrichment {
        email: Some(format!("{handle}@example.com")),
        website: Some(format!("https://{handle}.example.com")),
        social_urls: BTreeMap::from([(
            "instagram".to_string(),
            format!("https://instagram.com/{handle}"),
        )]),
        follower_count: Some(1_000 + h % 200_000),
    })
}

fn tier_for(score: f64) -> Tier {
    if score >= 0.75 {
        Tier::AutoEnroll
    } else if score >= 0.6 {
        Tier::HighPriorityReview
    } else if score >= 0.45 {
        Tier::StandardPriorityReview
    } else {
        Tier::LowPriorityReview
    }
}

fn digest(parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    hasher.finalize().into()
}

fn bucket(parts: &[&str]) -> u64 {
    let d = digest(parts);
    let mut head = [0u8; 8];
    head.copy_from_slice(&d[..8]);
    u64::from_be_bytes(head)
}

fn bucket_hex(parts: &[&str]) -> String {
    digest(parts).iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use funnel_state::{MemoryBreakerStore, SqliteStateBackend};
    use funnel_types::{Filters, Run};

    use crate::config::PipelineConfig;

    fn run_stage(adapter: &SimulatedAdapter, run: &mut Run, profiles: Vec<Profile>) -> StageResult {
        let state = SqliteStateBackend::in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let mut ctx = StageContext::new(run, adapter.stage, &state, &cancel);
        adapter.run(profiles, &mut ctx).unwrap()
    }

    #[test]
    fn test_discovery_is_deterministic_per_filters() {
        let adapter = SimulatedAdapter::new(Stage::Discovery, Platform::Patreon, 0.01);
        let filters = Filters::new().with("max_results", 12).with("category", "art");
        let mut a = Run::new(Platform::Patreon, filters.clone());
        let mut b = Run::new(Platform::Patreon, filters);

        let first = run_stage(&adapter, &mut a, Vec::new());
        let second = run_stage(&adapter, &mut b, Vec::new());
        assert_eq!(first.profiles.len(), 12);
        assert_eq!(first.profiles, second.profiles);
        assert!((first.cost - 0.12).abs() < 1e-9);
        assert_eq!(a.progress(Stage::Discovery).completed, 12);
    }

    #[test]
    fn test_pre_screen_partitions_input() {
        let discovery = SimulatedAdapter::new(Stage::Discovery, Platform::Instagram, 0.0);
        let screen = SimulatedAdapter::new(Stage::PreScreen, Platform::Instagram, 0.05);
        let mut run = Run::new(Platform::Instagram, Filters::new().with("max_results", 50));

        let found = run_stage(&discovery, &mut run, Vec::new()).profiles;
        let result = run_stage(&screen, &mut run, found);
        assert_eq!(result.processed, 50);
        assert_eq!(result.profiles.len() as u64 + result.failed, 50);
        assert!(result.profiles.iter().all(|p| p.pre_screen() == Some((true, Some("Active content, good engagement")))));
        assert!(result.profiles.iter().all(|p| !p.ephemeral.is_empty()));
    }

    #[test]
    fn test_scoring_attaches_tiers_in_range() {
        let adapter = SimulatedAdapter::new(Stage::Scoring, Platform::Facebook, 0.02);
        let mut run = Run::new(Platform::Facebook, Filters::new());
        let profiles = (0..30).map(|i| Profile::new(format!("p{i}"), Platform::Facebook)).collect();

        let result = run_stage(&adapter, &mut run, profiles);
        for p in &result.profiles {
            let (score, tier) = p.score().unwrap();
            assert!((0.3..=0.95).contains(&score));
            assert_eq!(tier, tier_for(score));
        }
    }

    #[test]
    fn test_enrichment_stops_when_breaker_open() {
        let config = PipelineConfig::default();
        let breakers = BreakerRegistry::from_config(&config, Arc::new(MemoryBreakerStore::new()));
        let breaker = breakers.get(ENRICHMENT_SERVICE).unwrap().clone();
        for _ in 0..breaker.config().failure_threshold {
            let _ = breaker.call(|| Err::<(), _>("down"));
        }

        let adapter = SimulatedAdapter::new(Stage::Enrichment, Platform::Patreon, 0.05).with_breaker(breaker);
        let mut run = Run::new(Platform::Patreon, Filters::new());
        let state = SqliteStateBackend::in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let mut ctx = StageContext::new(&mut run, Stage::Enrichment, &state, &cancel);

        let err = adapter
            .run(vec![Profile::new("p1", Platform::Patreon)], &mut ctx)
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.service, ENRICHMENT_SERVICE);
    }

    #[test]
    fn test_registry_covers_every_pair() {
        let config = PipelineConfig::default();
        let breakers = BreakerRegistry::from_config(&config, Arc::new(MemoryBreakerStore::new()));
        let registry = simulated_registry(&config.cost, &breakers);
        for stage in Stage::ORDER {
            for platform in Platform::ALL {
                assert!(registry.is_applicable(stage, platform), "{stage}/{platform}");
            }
        }
        let enrichment = registry.resolve(Stage::Enrichment, Platform::Patreon).unwrap();
        assert!((enrichment.estimate_cost(10) - 0.5).abs() < 1e-9);
    }
}
