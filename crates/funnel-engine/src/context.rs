//! Collaborators shared by every run executed in one process.

use std::sync::Arc;

use funnel_state::StateBackend;

use crate::config::CostConfig;
use crate::notify::{LogNotifier, Notifier};
use crate::registry::StageRegistry;

/// Everything the orchestrator needs besides the run itself.
///
/// Built once by the launcher and shared across worker threads.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<StageRegistry>,
    pub state: Arc<dyn StateBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub cost: CostConfig,
}

impl PipelineContext {
    /// Context with log-only notifications and the built-in cost table.
    pub fn new(registry: StageRegistry, state: Arc<dyn StateBackend>) -> Self {
        Self {
            registry: Arc::new(registry),
            state,
            notifier: Arc::new(LogNotifier),
            cost: CostConfig::default(),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: CostConfig) -> Self {
        self.cost = cost;
        self
    }
}
