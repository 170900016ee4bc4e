//! Scripted adapters and recording collaborators shared by the engine
//! integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use funnel_engine::notify::{Notification, NotificationKind, Notifier};
use funnel_engine::{AdapterInfo, PipelineContext, StageAdapter, StageContext, StageRegistry};
use funnel_state::{SqliteStateBackend, StateBackend};
use funnel_types::profile::Attachment;
use funnel_types::run::ProgressOutcome;
use funnel_types::{AdapterError, Filters, Platform, Profile, Run, RunId, Stage, StageResult, Tier};

type Behavior =
    dyn Fn(Vec<Profile>, &mut StageContext<'_>) -> Result<StageResult, AdapterError> + Send + Sync;

/// Adapter whose behavior is a closure; counts invocations.
pub struct Scripted {
    calls: AtomicUsize,
    rate: f64,
    behavior: Box<Behavior>,
}

impl Scripted {
    pub fn new(
        rate: f64,
        behavior: impl Fn(Vec<Profile>, &mut StageContext<'_>) -> Result<StageResult, AdapterError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            rate,
            behavior: Box::new(behavior),
        })
    }

    /// Passes every input profile through, charging `rate` per profile.
    pub fn passthrough(rate: f64) -> Arc<Self> {
        Self::new(rate, move |profiles, ctx| {
            for _ in &profiles {
                ctx.increment_progress(ProgressOutcome::Completed);
            }
            Ok(charged(profiles, rate))
        })
    }

    /// Discovers `count` fresh profiles for `platform`.
    pub fn discovery(platform: Platform, count: usize, cost: f64) -> Arc<Self> {
        Self::new(0.0, move |_, _| {
            let mut result = StageResult::new(make_profiles(platform, "d", count));
            result.processed = count as u64;
            result.cost = cost;
            Ok(result)
        })
    }

    /// Attaches a score; every other profile is auto-enroll.
    pub fn scoring(rate: f64) -> Arc<Self> {
        Self::new(rate, move |mut profiles, _| {
            for (i, p) in profiles.iter_mut().enumerate() {
                let tier = if i % 2 == 0 { Tier::AutoEnroll } else { Tier::HighPriorityReview };
                p.attach(Attachment::Score {
                    lead_score: 0.7,
                    tier,
                    reasoning: None,
                });
            }
            Ok(charged(profiles, rate))
        })
    }

    /// Attaches a CRM contact to every profile.
    pub fn crm_sync() -> Arc<Self> {
        Self::new(0.0, |mut profiles, _| {
            for p in &mut profiles {
                let contact_id = format!("c-{}", p.identity.id);
                p.attach(Attachment::CrmSync { contact_id });
            }
            Ok(charged(profiles, 0.0))
        })
    }

    /// Fails the whole stage.
    pub fn failing(err: AdapterError) -> Arc<Self> {
        Self::new(0.0, move |_, _| Err(err.clone()))
    }

    /// Must never run.
    pub fn forbidden() -> Arc<Self> {
        Self::new(0.0, |_, ctx| panic!("stage {} must not run", ctx.stage()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StageAdapter for Scripted {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new("scripted", &["test"], 0.0)
    }

    fn run(
        &self,
        profiles: Vec<Profile>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(profiles, ctx)
    }

    fn estimate_cost(&self, count: u64) -> f64 {
        self.rate * count as f64
    }
}

pub fn charged(profiles: Vec<Profile>, rate: f64) -> StageResult {
    let mut result = StageResult::new(profiles);
    result.processed = result.profiles.len() as u64;
    result.cost = rate * result.profiles.len() as f64;
    result
}

pub fn make_profiles(platform: Platform, prefix: &str, count: usize) -> Vec<Profile> {
    (0..count)
        .map(|i| {
            Profile::new(format!("{prefix}-{i}"), platform)
                .with_handle(format!("{prefix}_handle_{i}"))
                .with_field("follower_count", 1_000 + i as u64)
        })
        .collect()
}

/// Notifier that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub ctx: PipelineContext,
    pub state: Arc<SqliteStateBackend>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(registry: StageRegistry) -> Harness {
    let state = Arc::new(SqliteStateBackend::in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = PipelineContext::new(registry, state.clone()).with_notifier(notifier.clone());
    Harness {
        ctx,
        state,
        notifier,
    }
}

impl Harness {
    /// Persist a queued run and return its id.
    pub fn queue(&self, platform: Platform, filters: Filters) -> RunId {
        let run = Run::new(platform, filters);
        self.state.save_run(&run).unwrap();
        run.id
    }

    pub fn load(&self, id: &RunId) -> Run {
        self.state.load_run(id).unwrap().unwrap()
    }
}

/// Registry with the same adapter set for every stage of `platform`.
pub fn full_registry(platform: Platform, discovered: usize) -> StageRegistry {
    StageRegistry::new()
        .with(Stage::Discovery, platform, Scripted::discovery(platform, discovered, 0.10))
        .with(Stage::PreScreen, platform, Scripted::passthrough(0.01))
        .with(Stage::Enrichment, platform, Scripted::passthrough(0.01))
        .with(Stage::Analysis, platform, Scripted::passthrough(0.01))
        .with(Stage::Scoring, platform, Scripted::scoring(0.01))
        .with(Stage::CrmSync, platform, Scripted::crm_sync())
}
