//! Two-level stage registry: stage -> platform -> adapter.
//!
//! A stage with no entry at all is "not applicable" and the orchestrator
//! bypasses it silently. A present stage without an adapter for the run's
//! platform is reported as [`RegistryError::NoAdapterForPlatform`].

use std::collections::BTreeMap;
use std::sync::Arc;

use funnel_types::{Platform, Stage};
use serde::Serialize;

use crate::adapter::{AdapterInfo, StageAdapter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no adapters registered for stage '{0}'")]
    StageNotRegistered(Stage),
    #[error("no adapter for platform '{platform}' at stage '{stage}'")]
    NoAdapterForPlatform { stage: Stage, platform: Platform },
    #[error("unsupported platform '{0}': no discovery adapter registered")]
    UnsupportedPlatform(Platform),
}

/// Per-stage metadata for one platform, in stage order.
#[derive(Debug, Clone, Serialize)]
pub struct StageInfo {
    pub stage: Stage,
    #[serde(flatten)]
    pub info: AdapterInfo,
}

#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<Stage, BTreeMap<Platform, Arc<dyn StageAdapter>>>,
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for `(stage, platform)`.
    pub fn register(&mut self, stage: Stage, platform: Platform, adapter: Arc<dyn StageAdapter>) {
        self.stages.entry(stage).or_default().insert(platform, adapter);
    }

    #[must_use]
    pub fn with(mut self, stage: Stage, platform: Platform, adapter: Arc<dyn StageAdapter>) -> Self {
        self.register(stage, platform, adapter);
        self
    }

    /// Make `stage` present with no adapters, so lookups fail per platform
    /// instead of bypassing the stage.
    pub fn declare_stage(&mut self, stage: Stage) {
        self.stages.entry(stage).or_default();
    }

    /// # Errors
    ///
    /// [`RegistryError::StageNotRegistered`] when the stage is absent,
    /// [`RegistryError::NoAdapterForPlatform`] when it lacks `platform`.
    pub fn resolve(
        &self,
        stage: Stage,
        platform: Platform,
    ) -> Result<Arc<dyn StageAdapter>, RegistryError> {
        let adapters = self
            .stages
            .get(&stage)
            .ok_or(RegistryError::StageNotRegistered(stage))?;
        adapters
            .get(&platform)
            .cloned()
            .ok_or(RegistryError::NoAdapterForPlatform { stage, platform })
    }

    /// Whether `(stage, platform)` would run.
    #[must_use]
    pub fn is_applicable(&self, stage: Stage, platform: Platform) -> bool {
        self.resolve(stage, platform).is_ok()
    }

    /// A platform is launchable when it has a discovery adapter.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedPlatform`] otherwise.
    pub fn ensure_supported(&self, platform: Platform) -> Result<(), RegistryError> {
        if self.is_applicable(Stage::Discovery, platform) {
            Ok(())
        } else {
            Err(RegistryError::UnsupportedPlatform(platform))
        }
    }

    /// Metadata of every registered adapter, grouped by platform.
    #[must_use]
    pub fn pipeline_info(&self) -> BTreeMap<Platform, Vec<StageInfo>> {
        let mut out: BTreeMap<Platform, Vec<StageInfo>> = BTreeMap::new();
        for (stage, adapters) in &self.stages {
            for (platform, adapter) in adapters {
                out.entry(*platform).or_default().push(StageInfo {
                    stage: *stage,
                    info: adapter.info(),
                });
            }
        }
        out
    }
}
