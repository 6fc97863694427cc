//! Git working copy and remote tag queries
//!
//! Tag listings from both a local clone (`git show-ref --tags -d`) and a remote
//! (`git ls-remote --tags`) share one line format, parsed into a
//! [`TagSnapshot`]. Annotated tags appear twice; the peeled `^{}` line names
//! the commit and wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tagpilot_core::{Result, TagpilotError};
use tracing::{debug, info, instrument};

use crate::command::{CommandRunner, CommandSpec};

const PEELED_SUFFIX: &str = "^{}";

/// Tags with a given prefix and the commits they point to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSnapshot {
    commits: BTreeMap<String, String>,
}

impl TagSnapshot {
    /// Parse `<sha> refs/tags/<name>[^{}]` lines, keeping names with `prefix`
    pub fn parse(listing: &str, prefix: &str) -> Self {
        let mut commits = BTreeMap::new();
        let mut peeled = BTreeMap::new();

        for line in listing.lines() {
            let mut fields = line.split_whitespace();
            let (Some(sha), Some(reference)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Some(name) = reference.strip_prefix("refs/tags/") else {
                continue;
            };

            match name.strip_suffix(PEELED_SUFFIX) {
                Some(base) if base.starts_with(prefix) => {
                    peeled.insert(base.to_string(), sha.to_string());
                }
                None if name.starts_with(prefix) => {
                    commits.insert(name.to_string(), sha.to_string());
                }
                _ => {}
            }
        }

        commits.extend(peeled);
        Self { commits }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.commits.keys().map(String::as_str)
    }

    /// Commit a tag points to, if the tag exists
    pub fn commit(&self, tag: &str) -> Option<&str> {
        self.commits.get(tag).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// A local working copy driven through the `git` CLI
pub struct GitRepo<R: CommandRunner> {
    runner: R,
    path: PathBuf,
    url: String,
    env: Vec<(String, String)>,
}

impl<R: CommandRunner> GitRepo<R> {
    /// `env` is added to every git invocation (agent socket, ssh options)
    pub fn new(
        runner: R,
        path: impl Into<PathBuf>,
        url: impl Into<String>,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            runner,
            path: path.into(),
            url: url.into(),
            env,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new("git")
            .cwd(&self.path)
            .envs(self.env.iter().cloned())
    }

    async fn exec(&self, cmd: CommandSpec, what: &str) -> Result<String> {
        let output = self.runner.run(&cmd).await?;
        Ok(output.check(what, TagpilotError::Git)?.stdout)
    }

    /// Clone the repository if the working copy is absent, otherwise open it
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn ensure_clone(&self, branch: &str) -> Result<()> {
        if tokio::fs::try_exists(self.path.join(".git")).await? {
            debug!("Opening existing working copy");
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Cloning {} (branch {})", self.url, branch);
        let path = self.path.to_string_lossy().to_string();
        let cmd = CommandSpec::new("git")
            .args(["clone", "--branch", branch, self.url.as_str(), path.as_str()])
            .envs(self.env.iter().cloned());
        self.exec(cmd, "git clone").await?;
        Ok(())
    }

    /// Force-checkout a branch and fast-forward it, refreshing all tags
    ///
    /// Executes: `git checkout -f {branch}` then `git pull -f --tags origin {branch}`
    #[instrument(skip(self))]
    pub async fn refresh(&self, branch: &str) -> Result<()> {
        self.checkout_branch(branch).await?;
        self.exec(
            self.git().args(["pull", "-f", "--tags", "origin", branch]),
            "git pull",
        )
        .await?;
        Ok(())
    }

    /// Executes: `git checkout -f {branch}`
    pub async fn checkout_branch(&self, branch: &str) -> Result<()> {
        self.exec(self.git().args(["checkout", "-f", branch]), "git checkout")
            .await?;
        Ok(())
    }

    /// Executes: `git checkout -f {commit}`
    #[instrument(skip(self))]
    pub async fn checkout_commit(&self, commit: &str) -> Result<()> {
        self.exec(self.git().args(["checkout", "-f", commit]), "git checkout")
            .await?;
        Ok(())
    }

    /// Resolve a tag to the commit it points to, `None` if it does not exist
    pub async fn resolve(&self, tag: &str) -> Result<Option<String>> {
        let target = format!("{}^{{commit}}", tag);
        let output = self
            .runner
            .run(
                &self
                    .git()
                    .args(["rev-parse", "--verify", "--quiet", target.as_str()]),
            )
            .await?;
        let commit = output.stdout.trim();
        Ok((output.success && !commit.is_empty()).then(|| commit.to_string()))
    }

    /// All local tags with `prefix` and their commits
    ///
    /// Executes: `git show-ref --tags -d`
    pub async fn tag_snapshot(&self, prefix: &str) -> Result<TagSnapshot> {
        let output = self
            .runner
            .run(&self.git().args(["show-ref", "--tags", "-d"]))
            .await?;
        // show-ref exits 1 when the repository has no tags at all
        if !output.success && !output.stdout.trim().is_empty() {
            return Err(TagpilotError::Git(format!(
                "git show-ref failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(TagSnapshot::parse(&output.stdout, prefix))
    }
}

/// Tags with `prefix` on a remote, without a working copy
///
/// Executes: `git ls-remote --tags {url}`
#[instrument(skip(runner, env))]
pub async fn remote_tag_snapshot<R: CommandRunner>(
    runner: &R,
    url: &str,
    prefix: &str,
    env: &[(String, String)],
) -> Result<TagSnapshot> {
    let cmd = CommandSpec::new("git")
        .args(["ls-remote", "--tags", url])
        .envs(env.iter().cloned());
    let output = runner.run(&cmd).await?.check("git ls-remote", TagpilotError::Git)?;
    Ok(TagSnapshot::parse(&output.stdout, prefix))
}
