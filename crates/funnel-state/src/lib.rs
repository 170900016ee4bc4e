//! Persistence collaborators for the enrichment funnel.
//!
//! Provides the [`StateBackend`] trait (runs, lead results, dedup, filter
//! history), the [`BreakerStore`] trait (shared circuit-breaker counters),
//! a [`SqliteStateBackend`] implementing both, and an in-process
//! [`MemoryBreakerStore`].

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::{BreakerStore, StateBackend};
pub use error::StateError;
pub use memory::MemoryBreakerStore;
pub use sqlite::SqliteStateBackend;
