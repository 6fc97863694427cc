//! SSH key agent handling for git remotes
//!
//! The agent socket is returned to the caller and handed to git as a
//! per-command environment variable. The process environment is never
//! modified.

use std::path::Path;
use tagpilot_core::{Result, TagpilotError};
use tracing::{debug, info, instrument};

use crate::command::{CommandRunner, CommandSpec};

/// Prefix of a key reference naming an environment variable
pub const ENV_KEY_PREFIX: &str = "VAR:";

/// Environment for git commands talking to an SSH remote
pub fn git_ssh_env(socket: &str) -> Vec<(String, String)> {
    vec![
        ("SSH_AUTH_SOCK".to_string(), socket.to_string()),
        (
            "GIT_SSH_COMMAND".to_string(),
            "ssh -o StrictHostKeyChecking=accept-new".to_string(),
        ),
    ]
}

/// Read key material from a file path or from `VAR:NAME`
pub async fn load_key<F>(reference: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut key = if let Some(var) = reference.strip_prefix(ENV_KEY_PREFIX) {
        lookup(var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                TagpilotError::KeyAgent(format!("environment variable {} is not set", var))
            })?
    } else {
        tokio::fs::read_to_string(reference).await.map_err(|e| {
            TagpilotError::KeyAgent(format!("failed to read private key {}: {}", reference, e))
        })?
    };

    // ssh-add rejects keys without a final newline
    if !key.ends_with('\n') {
        key.push('\n');
    }
    Ok(key)
}

/// Extract the socket path from `ssh-agent -s` output
pub fn parse_agent_socket(output: &str) -> Option<String> {
    output.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("SSH_AUTH_SOCK=")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Return a reachable agent socket, starting an agent if needed
///
/// `existing` is the caller's `SSH_AUTH_SOCK`, if any.
#[instrument(skip(runner))]
pub async fn ensure_agent<R: CommandRunner>(runner: &R, existing: Option<&str>) -> Result<String> {
    if let Some(socket) = existing.filter(|s| !s.is_empty()) {
        if tokio::fs::try_exists(Path::new(socket)).await? {
            debug!("Using existing agent at {}", socket);
            return Ok(socket.to_string());
        }
    }

    let output = runner
        .run(&CommandSpec::new("ssh-agent").arg("-s"))
        .await?
        .check("ssh-agent", TagpilotError::KeyAgent)?;
    let socket = parse_agent_socket(&output.stdout).ok_or_else(|| {
        TagpilotError::KeyAgent("ssh-agent output has no SSH_AUTH_SOCK".to_string())
    })?;

    info!("Started ssh-agent at {}", socket);
    Ok(socket)
}

/// Add key material to the agent behind `socket`
///
/// Executes: `ssh-add -` with the key on stdin
pub async fn add_key<R: CommandRunner>(runner: &R, socket: &str, key: &str) -> Result<()> {
    runner
        .run(
            &CommandSpec::new("ssh-add")
                .arg("-")
                .env("SSH_AUTH_SOCK", socket)
                .stdin(key),
        )
        .await?
        .check("ssh-add", TagpilotError::KeyAgent)?;
    Ok(())
}
