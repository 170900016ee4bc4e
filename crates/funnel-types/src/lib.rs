//! Shared data model for the enrichment funnel.
//!
//! Pure types only: stages, runs, profile envelopes, stage results,
//! adapter errors and breaker state. No I/O lives here, so the state and
//! engine crates can both depend on it.

#![warn(clippy::pedantic)]

pub mod breaker;
pub mod checkpoint;
pub mod error;
pub mod filters;
pub mod profile;
pub mod result;
pub mod run;
pub mod stage;
pub mod state;

pub use error::{AdapterError, BackoffClass, ErrorKind};
pub use filters::Filters;
pub use profile::{Attachment, Profile, Tier};
pub use result::StageResult;
pub use run::{Run, RunId};
pub use stage::{Platform, RunStatus, Stage};
