//! Release pipeline
//!
//! Stages run strictly in order and short-circuit on the first error:
//! checkout, build, sync, deploy. Each stage after checkout is enabled by the
//! job. Deploy is followed by readiness polling on the back-off schedule.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tagpilot_core::backoff::ReadinessSchedule;
use tagpilot_core::{JobSpec, ReconcileMode, Result};
use tagpilot_tools::git::remote_tag_snapshot;
use tagpilot_tools::{
    docker, manifest, rsync, ssh_agent, CommandRunner, DeploymentStatus, GitRepo, ImageBuilder,
    Kubectl, ManifestBindings, TagSnapshot,
};
use tracing::{debug, info, instrument, warn};

use crate::context::RuntimeContext;
use crate::locks::{credentials_lock, kubeconfig_lock, SSH_AGENT_LOCK};

/// How a release attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Every enabled stage succeeded
    Applied,
    /// The manifest was applied but the cluster did not confirm the release
    NotReady { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub outcome: ReleaseOutcome,
    /// Time spent waiting for readiness
    pub waited: Duration,
}

/// Executes releases for one job
pub struct ReleasePipeline<R: CommandRunner + Clone> {
    spec: Arc<JobSpec>,
    ctx: RuntimeContext<R>,
    git_env: Vec<(String, String)>,
    repo: Option<GitRepo<R>>,
}

impl<R: CommandRunner + Clone> ReleasePipeline<R> {
    /// Load SSH credentials and open or clone the working copy
    #[instrument(skip_all)]
    pub async fn prepare(spec: Arc<JobSpec>, ctx: RuntimeContext<R>) -> Result<Self> {
        let git_env = if spec.git.is_ssh_url() && !spec.git.git_private_key.is_empty() {
            Self::load_ssh_key(&spec, &ctx).await?
        } else {
            Vec::new()
        };

        let repo = match spec.mode()? {
            ReconcileMode::Clone => {
                let repo = GitRepo::new(
                    ctx.runner.clone(),
                    &spec.git.git_local_folder,
                    spec.git.git_repo_url.as_str(),
                    git_env.clone(),
                );
                repo.ensure_clone(&spec.git.git_branch).await?;
                Some(repo)
            }
            ReconcileMode::Watch => None,
        };

        Ok(Self {
            spec,
            ctx,
            git_env,
            repo,
        })
    }

    async fn load_ssh_key(spec: &JobSpec, ctx: &RuntimeContext<R>) -> Result<Vec<(String, String)>> {
        let _guard = ctx.locks.lock(SSH_AGENT_LOCK).await;
        let key = ssh_agent::load_key(&spec.git.git_private_key, |var| std::env::var(var).ok()).await?;
        let socket = match ctx.agent_socket.get() {
            Some(socket) => socket.clone(),
            None => {
                let socket =
                    ssh_agent::ensure_agent(&ctx.runner, ctx.settings.ssh_auth_sock.as_deref())
                        .await?;
                // Still under the agent lock, so the cell is empty
                let _ = ctx.agent_socket.set(socket.clone());
                socket
            }
        };
        ssh_agent::add_key(&ctx.runner, &socket, &key).await?;
        debug!("Private key added to agent at {}", socket);
        Ok(ssh_agent::git_ssh_env(&socket))
    }

    /// Whether tags come from a local working copy
    pub fn has_working_copy(&self) -> bool {
        self.repo.is_some()
    }

    /// Commit a tag points to in the working copy, before any refresh
    pub async fn resolve(&self, tag: &str) -> Result<Option<String>> {
        match &self.repo {
            Some(repo) => repo.resolve(tag).await,
            None => Ok(None),
        }
    }

    /// Refresh and list candidate tags
    pub async fn tag_snapshot(&self) -> Result<TagSnapshot> {
        let prefix = self.spec.tag_prefix();
        match &self.repo {
            Some(repo) => {
                repo.refresh(&self.spec.git.git_branch).await?;
                repo.tag_snapshot(prefix).await
            }
            None => {
                remote_tag_snapshot(&self.ctx.runner, &self.spec.git.git_repo_url, prefix, &self.git_env)
                    .await
            }
        }
    }

    /// Tag of the image the deployment currently runs
    pub async fn live_tag(&self) -> Result<String> {
        let status = self.deployment_status().await?;
        Ok(status.image_tag(&self.spec.docker.docker_image, self.spec.tag_prefix()))
    }

    /// Run every enabled stage for `tag` at `commit`
    #[instrument(skip(self, commit))]
    pub async fn release(&self, tag: &str, commit: &str) -> Result<ReleaseReport> {
        if let Some(repo) = &self.repo {
            info!("Checking out {} at {}", tag, short(commit));
            repo.checkout_commit(commit).await?;
        }

        if self.spec.docker.do_docker_build {
            self.build(tag).await?;
        }

        if self.spec.sync.do_subfolder_sync {
            self.sync().await?;
        }

        if !self.spec.deploy.do_manifest_deploy {
            return Ok(ReleaseReport {
                outcome: ReleaseOutcome::Applied,
                waited: Duration::ZERO,
            });
        }

        self.deploy(tag).await
    }

    fn working_copy(&self) -> &Path {
        match &self.repo {
            Some(repo) => repo.path(),
            None => Path::new(&self.spec.git.git_local_folder),
        }
    }

    async fn build(&self, tag: &str) -> Result<()> {
        let dir = &self.ctx.settings.credentials_dir;
        let image = self.spec.image_for(tag);
        info!("Building image {}", image);

        // The credential file must stay put until the push is done
        let _guard = self.ctx.locks.lock(&credentials_lock(dir)).await;
        docker::materialize_credentials(&self.ctx.runner, dir, &self.spec.docker).await?;
        ImageBuilder::new(self.ctx.runner.clone(), dir.as_path())
            .build_and_push(
                self.working_copy(),
                &self.spec.docker.docker_file,
                &image,
                &self.spec.docker.docker_platforms,
            )
            .await?;

        info!("Image {} pushed", image);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let source = self.working_copy().join(&self.spec.sync.git_sub_folder);
        let target = Path::new(&self.spec.sync.target_folder);
        info!("Syncing {} to {}", source.display(), target.display());
        rsync::mirror(&self.ctx.runner, &source, target).await
    }

    fn kubectl(&self) -> Kubectl<R> {
        let kubeconfig = &self.spec.deploy.kubeconfig;
        Kubectl::new(
            self.ctx.runner.clone(),
            (!kubeconfig.is_empty()).then(|| PathBuf::from(kubeconfig)),
        )
    }

    fn manifest_path(&self) -> PathBuf {
        let path = Path::new(&self.spec.deploy.manifests_k8s);
        match &self.repo {
            Some(repo) if path.is_relative() => repo.path().join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn deployment_status(&self) -> Result<DeploymentStatus> {
        let deploy = &self.spec.deploy;
        let _guard = self.ctx.locks.lock(&kubeconfig_lock(&deploy.kubeconfig)).await;
        let kubectl = self.kubectl();
        if !deploy.context_k8s.is_empty() {
            kubectl.use_context(&deploy.context_k8s).await?;
        }
        kubectl
            .deployment_status(&deploy.deployment_name_k8s, &deploy.namespace_k8s)
            .await
    }

    async fn deploy(&self, tag: &str) -> Result<ReleaseReport> {
        let deploy = &self.spec.deploy;
        let bindings = ManifestBindings {
            release: tag.to_string(),
            image: self.spec.image_for(tag),
            pg_secrets: deploy.secrets_path.clone(),
        };
        let rendered = manifest::render_file(&self.manifest_path(), &bindings).await?;

        {
            let _guard = self.ctx.locks.lock(&kubeconfig_lock(&deploy.kubeconfig)).await;
            let kubectl = self.kubectl();
            if !deploy.context_k8s.is_empty() {
                kubectl.use_context(&deploy.context_k8s).await?;
            }
            kubectl.apply(&rendered).await?;
        }

        let schedule = ReadinessSchedule::for_interval(
            self.spec.interval_secs(),
            self.ctx.settings.mode.allows_short_intervals(),
        );
        let checks = schedule.slots().len();
        let mut waited = Duration::ZERO;
        let mut ready = None;

        for (i, slot) in schedule.slots().iter().enumerate() {
            tokio::time::sleep(*slot).await;
            waited += *slot;

            match self.deployment_status().await {
                Ok(status) if status.is_ready() => {
                    debug!("Deployment ready after check {}/{}", i + 1, checks);
                    ready = Some(status);
                    break;
                }
                Ok(status) => info!(
                    "Check {}/{}: {} of {} replicas ready for {}",
                    i + 1,
                    checks,
                    status.ready,
                    status.desired,
                    tag
                ),
                Err(e) => warn!("Check {}/{} failed: {}", i + 1, checks, e),
            }
        }

        let outcome = match ready {
            Some(status) => {
                let live = status.image_tag(&self.spec.docker.docker_image, self.spec.tag_prefix());
                if live == tag {
                    ReleaseOutcome::Applied
                } else {
                    ReleaseOutcome::NotReady {
                        reason: format!("deployment is ready but runs {} instead of {}", live, tag),
                    }
                }
            }
            None => ReleaseOutcome::NotReady {
                reason: format!("deployment not ready after {} checks", checks),
            },
        };

        Ok(ReleaseReport { outcome, waited })
    }
}

fn short(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}
