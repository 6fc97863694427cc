//! # tagpilot-tools
//!
//! External collaborators of the deployment agent.
//!
//! Every tool is driven through the [`CommandRunner`] trait, so the engine can
//! be exercised against a scripted [`MockRunner`] instead of real binaries:
//! - git working copies and remote tag listings
//! - `docker buildx` image builds and registry credentials
//! - `kubectl` context switch, apply and deployment status
//! - `rsync` mirroring
//! - `ssh-agent` / `ssh-add`
//! - manifest template rendering

mod command;
pub mod docker;
pub mod git;
pub mod kubectl;
pub mod manifest;
pub mod rsync;
pub mod ssh_agent;

pub use command::{CommandOutput, CommandRunner, CommandSpec, MockRunner, ProcessRunner, RecordedCall};
pub use docker::{ImageBuilder, RegistryLogin};
pub use git::{GitRepo, TagSnapshot};
pub use kubectl::{DeploymentStatus, Kubectl};
pub use manifest::ManifestBindings;
