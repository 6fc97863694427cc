//! # tagpilot-engine
//!
//! Reconciliation engine for tagpilot.
//!
//! This crate provides:
//! - The upgrade decision and cycle state machine
//! - The release pipeline (checkout, build, sync, deploy, readiness)
//! - The per-job runtime with hot reload
//! - The supervisor that runs all jobs concurrently

mod context;
mod decision;
mod locks;
mod pipeline;
mod retry;
mod runtime;
mod state_file;
mod supervisor;

pub use context::{RuntimeContext, RuntimeSettings};
pub use decision::{should_upgrade, transition, Action, Event, Observation, State, UpgradeReason};
pub use locks::NamedLocks;
pub use pipeline::{ReleaseOutcome, ReleasePipeline, ReleaseReport};
pub use retry::{RetryState, RetryVerdict, MAX_APPLY_RETRIES};
pub use runtime::{CycleReport, JobOutcome, JobRuntime};
pub use state_file::PersistedTagState;
pub use supervisor::{Supervisor, SupervisorReport};
