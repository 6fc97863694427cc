//! External command execution abstraction

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use tagpilot_core::{Result, TagpilotError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A fully described external command
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then closed
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment for this command only
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    /// `program arg1 arg2 ...`, used for logging and mock lookup
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// Stdin and env may carry secrets
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.command_line())
            .field("cwd", &self.cwd)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// Turn a non-zero exit into an error built by `wrap`
    pub fn check<F>(self, what: &str, wrap: F) -> Result<Self>
    where
        F: FnOnce(String) -> TagpilotError,
    {
        if self.success {
            Ok(self)
        } else {
            let detail = if self.stderr.trim().is_empty() {
                self.stdout.trim()
            } else {
                self.stderr.trim()
            };
            Err(wrap(format!("{} failed: {}", what, detail)))
        }
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;
}

/// Real command runner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip(self), fields(command = %cmd.command_line()))]
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing {}", cmd.command_line());

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            TagpilotError::Command(format!("Failed to start {}: {}", cmd.program, e))
        })?;

        if let (Some(input), Some(mut pipe)) = (&cmd.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TagpilotError::Command(format!("Failed to run {}: {}", cmd.program, e)))?;

        let output = CommandOutput::from(output);
        if output.success {
            debug!(stdout = %output.stdout.trim(), "Command succeeded");
        } else {
            debug!(stderr = %output.stderr.trim(), "Command failed");
        }

        Ok(output)
    }
}

/// A command observed by [`MockRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, VecDeque<CommandOutput>>,
    calls: Vec<RecordedCall>,
}

/// Mock command runner for testing
///
/// Responses are keyed by command line. An exact key wins; otherwise the
/// longest registered key that prefixes the command line is used. A key with
/// several queued responses yields them in order and then keeps returning the
/// last one. Clones share state, so a test can keep a handle and rescript
/// responses while the code under test runs.
#[derive(Clone, Default)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_response(self, command: &str, output: CommandOutput) -> Self {
        self.set_response(command, output);
        self
    }

    /// Replace all queued responses for `command`
    pub fn set_response(&self, command: &str, output: CommandOutput) {
        self.set_sequence(command, vec![output]);
    }

    /// Queue responses for `command`; the last one repeats
    pub fn set_sequence(&self, command: &str, outputs: Vec<CommandOutput>) {
        self.state()
            .responses
            .insert(command.to_string(), outputs.into());
    }

    /// Every command run so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Number of recorded commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.command.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let key = cmd.command_line();
        let mut state = self.state();
        state.calls.push(RecordedCall {
            command: key.clone(),
            stdin: cmd.stdin.clone(),
            cwd: cmd.cwd.clone(),
            env: cmd.env.clone(),
        });

        let matched = if state.responses.contains_key(&key) {
            Some(key.clone())
        } else {
            state
                .responses
                .keys()
                .filter(|k| key.starts_with(k.as_str()))
                .max_by_key(|k| k.len())
                .cloned()
        };

        let queue = match matched {
            Some(k) => state.responses.get_mut(&k),
            None => None,
        }
        .ok_or_else(|| TagpilotError::Command(format!("No mock response for: {}", key)))?;

        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        output.ok_or_else(|| TagpilotError::Command(format!("No mock response for: {}", key)))
    }
}
