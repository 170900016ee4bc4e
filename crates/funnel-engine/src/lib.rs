//! Orchestration crate for enrichment funnel runs.
//!
//! A run walks the fixed stage order through a [`StageRegistry`] of
//! per-platform adapters. The [`orchestrator`] enforces the cost budget
//! before each stage, checkpoints stage outputs and finalizes the run; the
//! [`launcher`] persists runs and executes them on blocking worker threads.

pub mod adapter;
pub mod budget;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod errors;
pub mod fingerprint;
pub mod launcher;
pub mod notify;
pub mod orchestrator;
pub(crate) mod persist;
pub mod registry;
pub mod simulated;
pub mod summary;

// Re-export public API for convenience
pub use adapter::{AdapterInfo, StageAdapter, StageContext};
pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitOpen};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use errors::PipelineError;
pub use launcher::{JobHandle, LaunchError, Launcher};
pub use notify::{LogNotifier, Notification, Notifier};
pub use orchestrator::run_pipeline;
pub use registry::StageRegistry;
pub use simulated::simulated_registry;
