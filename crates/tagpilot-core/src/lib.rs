//! # tagpilot-core
//!
//! Core types for the tagpilot GitOps deployment agent.
//!
//! - [`tag`] decodes `<prefix>MAJOR.MINOR.PATCH` tags into comparable integers
//!   and selects the highest tag below a ceiling
//! - [`backoff`] computes the readiness wait schedule after an apply
//! - [`JobSpec`] is the parsed, validated job file

mod config;
mod error;
mod fingerprint;

pub mod backoff;
pub mod substitute;
pub mod tag;

pub use config::*;
pub use error::{Result, TagpilotError};
pub use fingerprint::Fingerprint;
