//! Process-wide settings and shared handles passed into every job

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tagpilot_core::RunMode;
use tagpilot_tools::CommandRunner;
use tokio::sync::OnceCell;

use crate::locks::NamedLocks;

/// Settings fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub mode: RunMode,
    /// Run exactly one reconciliation cycle per job, then exit
    pub once: bool,
    /// Where registry credentials are materialised
    pub credentials_dir: PathBuf,
    /// Gap between the starts of consecutive jobs
    pub start_delay: Duration,
    /// `SSH_AUTH_SOCK` seen at startup
    pub ssh_auth_sock: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Production,
            once: false,
            credentials_dir: PathBuf::from("/tmp/tagpilot/docker"),
            start_delay: Duration::ZERO,
            ssh_auth_sock: None,
        }
    }
}

/// Everything a job needs besides its own configuration
pub struct RuntimeContext<R: CommandRunner> {
    pub runner: R,
    pub settings: Arc<RuntimeSettings>,
    pub locks: Arc<NamedLocks>,
    /// Socket of the ssh-agent every job shares once one is known
    pub agent_socket: Arc<OnceCell<String>>,
}

impl<R: CommandRunner> RuntimeContext<R> {
    pub fn new(runner: R, settings: RuntimeSettings) -> Self {
        Self {
            runner,
            settings: Arc::new(settings),
            locks: Arc::new(NamedLocks::new()),
            agent_socket: Arc::new(OnceCell::new()),
        }
    }
}

impl<R: CommandRunner + Clone> Clone for RuntimeContext<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            settings: Arc::clone(&self.settings),
            locks: Arc::clone(&self.locks),
            agent_socket: Arc::clone(&self.agent_socket),
        }
    }
}
