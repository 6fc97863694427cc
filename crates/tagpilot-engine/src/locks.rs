//! Named async locks for shared credential resources
//!
//! Jobs run concurrently but may share a registry credential directory or a
//! kubeconfig. Each such resource gets one mutex, looked up by name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Lock name for a registry credential directory
pub fn credentials_lock(dir: &std::path::Path) -> String {
    format!("docker-config:{}", dir.display())
}

/// Lock name for a kubeconfig; jobs without one share the default
pub fn kubeconfig_lock(kubeconfig: &str) -> String {
    if kubeconfig.is_empty() {
        "kubeconfig:default".to_string()
    } else {
        format!("kubeconfig:{}", kubeconfig)
    }
}

pub const SSH_AGENT_LOCK: &str = "ssh-agent";
