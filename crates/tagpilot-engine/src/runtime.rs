//! Job runtime: the per-job reconciliation loop
//!
//! One runtime instance drives one job configuration. Each cycle refreshes the
//! tag list, picks the candidate, decides whether to release it and persists
//! the applied tag on success. Between cycles the job file is fingerprinted;
//! an edit ends this instance with [`JobOutcome::Restart`] carrying the
//! reloaded job, and the supervisor starts a fresh instance from it.

use std::sync::Arc;
use std::time::Duration;
use tagpilot_core::{tag, Fingerprint, JobSpec, LoadedJob, Result, TagpilotError};
use tagpilot_tools::CommandRunner;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::RuntimeContext;
use crate::decision::{
    should_upgrade, transition, Action, Event, Observation, State, UpgradeReason,
};
use crate::pipeline::{ReleaseOutcome, ReleasePipeline, ReleaseReport};
use crate::retry::{RetryState, RetryVerdict};
use crate::state_file::PersistedTagState;

/// How a runtime instance ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Inactive, or a single-cycle run completed
    Finished,
    /// The job file changed; continue with the reloaded job
    Restart(Box<LoadedJob>),
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub candidate: String,
    /// A release was applied and persisted this cycle
    pub committed: bool,
    /// Time spent waiting for readiness
    pub waited: Duration,
}

pub struct JobRuntime<R: CommandRunner + Clone> {
    spec: Arc<JobSpec>,
    fingerprint: Fingerprint,
    ctx: RuntimeContext<R>,
    instance: Uuid,
    state_file: PersistedTagState,
    state: State,
    retry: RetryState,
    applied_tag: String,
    applied_commit: Option<String>,
    applied_commit_resolved: bool,
}

impl<R: CommandRunner + Clone> JobRuntime<R> {
    pub fn new(job: LoadedJob, ctx: RuntimeContext<R>) -> Self {
        let state_file = PersistedTagState::new(job.spec.state_file_path());
        let applied_tag = job.spec.git.git_start_tag.clone();
        Self {
            spec: Arc::new(job.spec),
            fingerprint: job.fingerprint,
            ctx,
            instance: Uuid::new_v4(),
            state_file,
            state: State::Idle,
            retry: RetryState::default(),
            applied_tag,
            applied_commit: None,
            applied_commit_resolved: false,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn applied_tag(&self) -> &str {
        &self.applied_tag
    }

    /// Run until the job finishes, fails or asks to be restarted
    pub async fn run(self) -> Result<JobOutcome> {
        let instance = self.instance.simple().to_string();
        let span = info_span!("job", name = %self.spec.name(), instance = %&instance[..8]);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) -> Result<JobOutcome> {
        if !self.spec.is_active() {
            info!("Job is inactive, exiting");
            return Ok(JobOutcome::Finished);
        }

        info!(
            "Starting job from {} ({})",
            self.spec.source_path.display(),
            self.fingerprint
        );
        let pipeline = ReleasePipeline::prepare(Arc::clone(&self.spec), self.ctx.clone()).await?;
        self.normalize_applied_tag(&pipeline).await?;

        loop {
            let report = self.cycle(&pipeline).await?;

            if self.ctx.settings.once {
                info!("Single cycle complete");
                return Ok(JobOutcome::Finished);
            }

            if let Some(next) = self.poll_job_file().await? {
                let next = self.wait_until_active(next).await?;
                info!("Job file changed, restarting with the new configuration");
                return Ok(JobOutcome::Restart(Box::new(next)));
            }

            let rest = Duration::from_secs(self.spec.interval_secs()).saturating_sub(report.waited);
            if !rest.is_zero() {
                debug!("Next check in {:?}", rest);
                tokio::time::sleep(rest).await;
            }
        }
    }

    /// Establish the applied tag before the first cycle.
    ///
    /// The cluster's live tag wins when deploy is enabled, then the state file,
    /// then the configured start tag. A tag above the ceiling is reset to the
    /// zero tag so the next cycle rolls back to the best tag within it.
    async fn normalize_applied_tag(&mut self, pipeline: &ReleasePipeline<R>) -> Result<()> {
        let prefix = self.spec.tag_prefix();

        let live = if self.spec.deploy.do_manifest_deploy {
            match pipeline.live_tag().await {
                Ok(tag) => Some(tag),
                Err(e) => {
                    warn!("Could not read the live tag from the cluster: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let stored = self.state_file.read().await?;

        let mut applied = live
            .or(stored)
            .unwrap_or_else(|| self.spec.git.git_start_tag.clone());

        let ceiling = &self.spec.git.git_max_tag;
        if !ceiling.is_empty() && tag::compare(&applied, ceiling, prefix)?.is_gt() {
            warn!("Applied tag {} is above the ceiling {}, resetting", applied, ceiling);
            applied = tag::zero_tag(prefix);
        }

        self.state_file.write(&applied).await?;
        info!("Applied tag is {}", applied);

        if pipeline.has_working_copy() {
            self.applied_commit = pipeline.resolve(&applied).await?;
            self.applied_commit_resolved = true;
        }
        self.applied_tag = applied;
        Ok(())
    }

    /// Feed an event to the state machine and execute its log and abort actions
    fn step(&mut self, event: Event) -> Vec<Action> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let (next, actions) = transition(state, event);
        self.state = next;

        actions
            .into_iter()
            .filter(|action| match action {
                Action::Log { message } => {
                    info!("{}", message);
                    false
                }
                Action::Abort { error } => {
                    error!("Aborting: {}", error);
                    false
                }
                Action::RunPipeline { .. } => true,
            })
            .collect()
    }

    async fn evaluate(
        &mut self,
        pipeline: &ReleasePipeline<R>,
    ) -> Result<(String, Option<String>, Option<UpgradeReason>)> {
        let snapshot = pipeline.tag_snapshot().await?;
        if !self.applied_commit_resolved {
            self.applied_commit = snapshot.commit(&self.applied_tag).map(str::to_string);
            self.applied_commit_resolved = true;
        }

        let prefix = self.spec.tag_prefix();
        let (_, candidate) = tag::select_max(snapshot.tags(), &self.spec.git.git_max_tag, prefix)?;
        if self.retry.observe(&candidate) {
            info!("New candidate {}, retry count reset", candidate);
        }

        let candidate_commit = snapshot.commit(&candidate).map(str::to_string);
        let upgrade = should_upgrade(&Observation {
            candidate_tag: &candidate,
            candidate_commit: candidate_commit.as_deref(),
            applied_tag: &self.applied_tag,
            applied_commit: self.applied_commit.as_deref(),
            prefix,
        })?;

        debug!(
            "Candidate {} ({:?}), applied {} ({:?})",
            candidate, candidate_commit, self.applied_tag, self.applied_commit
        );
        Ok((candidate, candidate_commit, upgrade))
    }

    /// Run one reconciliation cycle
    pub async fn cycle(&mut self, pipeline: &ReleasePipeline<R>) -> Result<CycleReport> {
        self.step(Event::CycleStarted);

        let (candidate, candidate_commit, upgrade) = match self.evaluate(pipeline).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                self.step(Event::EvaluationFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut report = CycleReport {
            candidate: candidate.clone(),
            committed: false,
            waited: Duration::ZERO,
        };

        let actions = self.step(Event::Evaluated {
            candidate: candidate.clone(),
            upgrade,
        });
        let should_release = actions
            .iter()
            .any(|a| matches!(a, Action::RunPipeline { .. }));

        if let (true, Some(commit)) = (should_release, candidate_commit) {
            let result = pipeline.release(&candidate, &commit).await;
            report.waited = result.as_ref().map(|r| r.waited).unwrap_or_default();
            report.committed = self.settle(&candidate, commit, result).await?;
        }

        Ok(report)
    }

    /// Persist a successful release or charge a failed attempt
    async fn settle(
        &mut self,
        candidate: &str,
        commit: String,
        result: Result<ReleaseReport>,
    ) -> Result<bool> {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.step(Event::ReleaseFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        match report.outcome {
            ReleaseOutcome::Applied => {
                self.state_file.write(candidate).await?;
                self.applied_tag = candidate.to_string();
                self.applied_commit = Some(commit);
                self.retry.record_success();
                self.step(Event::ReleaseCommitted);
                Ok(true)
            }
            ReleaseOutcome::NotReady { reason } => {
                warn!("Release {} not applied: {}", candidate, reason);
                match self.retry.record_failure() {
                    RetryVerdict::Retry { attempts } => {
                        self.step(Event::ReleasePending { attempts });
                        Ok(false)
                    }
                    RetryVerdict::Exhausted { attempts } => {
                        let err = TagpilotError::RetriesExhausted {
                            tag: candidate.to_string(),
                            attempts,
                        };
                        self.step(Event::ReleaseFailed {
                            message: err.to_string(),
                        });
                        Err(err)
                    }
                }
            }
        }
    }

    /// Reload the job file if its fingerprint changed
    async fn poll_job_file(&mut self) -> Result<Option<LoadedJob>> {
        let path = &self.spec.source_path;
        let current = Fingerprint::of_file(path).await.map_err(|e| {
            TagpilotError::Config(format!("job file {} is gone: {}", path.display(), e))
        })?;
        if current == self.fingerprint {
            return Ok(None);
        }

        info!("Job file fingerprint {} -> {}", self.fingerprint, current);
        let loaded = LoadedJob::read(path, self.ctx.settings.mode).await?;
        self.fingerprint = loaded.fingerprint.clone();
        Ok(Some(loaded))
    }

    /// Suspend while the reloaded job is inactive, re-reading it every interval
    async fn wait_until_active(&mut self, mut next: LoadedJob) -> Result<LoadedJob> {
        while !next.spec.is_active() {
            info!(
                "Job deactivated, checking again in {}s",
                next.spec.interval_secs()
            );
            tokio::time::sleep(Duration::from_secs(next.spec.interval_secs())).await;
            if let Some(reloaded) = self.poll_job_file().await? {
                next = reloaded;
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RuntimeSettings;
    use std::path::{Path, PathBuf};
    use tagpilot_core::RunMode;
    use tagpilot_tools::{CommandOutput, MockRunner};

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const SHA_C: &str = "cccccccccccccccccccccccccccccccccccccccc";

    struct Fixture {
        dir: tempfile::TempDir,
        runner: MockRunner,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("repo").join(".git")).unwrap();
            std::fs::write(
                dir.path().join("repo").join("deploy.yaml"),
                "image: {{ .Image }}\n",
            )
            .unwrap();

            let runner = MockRunner::new()
                .with_response("git checkout -f", CommandOutput::ok(""))
                .with_response("git pull", CommandOutput::ok(""));
            Self { dir, runner }
        }

        fn job_path(&self) -> PathBuf {
            self.dir.path().join("web.json")
        }

        fn state_path(&self) -> PathBuf {
            self.dir.path().join("start-tag-file.web")
        }

        fn write_job(&self, extra_common: &str, sections: &str) {
            let json = format!(
                r#"{{"Common": {{"job_name": "web", "check_interval": 40 {}}},
                    "Git": {{"git_repo_url": "https://example.com/web.git",
                             "git_local_folder": "{}",
                             "git_start_tag_file": "{}"}}
                    {}}}"#,
                extra_common,
                self.dir.path().join("repo").display(),
                self.dir.path().join("start-tag-file").display(),
                sections
            );
            std::fs::write(self.job_path(), json).unwrap();
        }

        fn tags(&self, listing: &[(&str, &str)]) {
            let out: String = listing
                .iter()
                .map(|(tag, sha)| format!("{} refs/tags/{}\n", sha, tag))
                .collect();
            self.runner
                .set_response("git show-ref --tags -d", CommandOutput::ok(out));
        }

        fn resolves(&self, tag: &str, sha: &str) {
            self.runner.set_response(
                &format!("git rev-parse --verify --quiet {}^{{commit}}", tag),
                CommandOutput::ok(sha),
            );
        }

        fn ctx(&self, once: bool) -> RuntimeContext<MockRunner> {
            RuntimeContext::new(
                self.runner.clone(),
                RuntimeSettings {
                    mode: RunMode::Development,
                    once,
                    credentials_dir: self.dir.path().join("creds"),
                    ..Default::default()
                },
            )
        }

        async fn runtime(&self, once: bool) -> JobRuntime<MockRunner> {
            let job = LoadedJob::read(&self.job_path(), RunMode::Development)
                .await
                .unwrap();
            JobRuntime::new(job, self.ctx(once))
        }

        async fn started(&self) -> (JobRuntime<MockRunner>, ReleasePipeline<MockRunner>) {
            let mut runtime = self.runtime(false).await;
            let pipeline = ReleasePipeline::prepare(Arc::clone(&runtime.spec), runtime.ctx.clone())
                .await
                .unwrap();
            runtime.normalize_applied_tag(&pipeline).await.unwrap();
            (runtime, pipeline)
        }

        fn stored_tag(&self) -> String {
            std::fs::read_to_string(self.state_path()).unwrap()
        }
    }

    const DEPLOY: &str = r#", "Docker": {"docker_image": "registry.example.com/web"},
        "Deploy": {"do_manifest_deploy": true, "deployment_name_k8s": "web",
                   "manifests_k8s": "deploy.yaml"}"#;

    fn side_effects(runner: &MockRunner) -> usize {
        runner.count("docker") + runner.count("kubectl apply") + runner.count("rsync")
    }

    #[tokio::test]
    async fn test_inactive_job_exits_immediately() {
        let fx = Fixture::new();
        fx.write_job(r#", "is_active": false"#, "");

        let outcome = fx.runtime(false).await.run().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Finished));
        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_startup_prefers_state_file_over_start_tag() {
        let fx = Fixture::new();
        fx.write_job("", "");
        std::fs::write(fx.state_path(), "v1.4.0\n").unwrap();
        fx.resolves("v1.4.0", SHA_A);

        let (runtime, _) = fx.started().await;
        assert_eq!(runtime.applied_tag(), "v1.4.0");
        assert_eq!(runtime.applied_commit.as_deref(), Some(SHA_A));
    }

    #[tokio::test]
    async fn test_startup_prefers_live_cluster_tag() {
        let fx = Fixture::new();
        fx.write_job("", DEPLOY);
        std::fs::write(fx.state_path(), "v1.4.0").unwrap();
        fx.runner.set_response(
            "kubectl get deployment web",
            CommandOutput::ok("1|1|registry.example.com/web:v1.5.0"),
        );
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));

        let (runtime, _) = fx.started().await;
        assert_eq!(runtime.applied_tag(), "v1.5.0");
        assert_eq!(fx.stored_tag(), "v1.5.0");
    }

    #[tokio::test]
    async fn test_startup_resets_tag_above_ceiling() {
        let fx = Fixture::new();
        fx.write_job("", "");
        let json = std::fs::read_to_string(fx.job_path())
            .unwrap()
            .replace(r#""git_repo_url""#, r#""git_max_tag": "v1.9.9", "git_repo_url""#);
        std::fs::write(fx.job_path(), json).unwrap();
        std::fs::write(fx.state_path(), "v2.0.0").unwrap();
        fx.runner.set_response("git rev-parse", CommandOutput::failed(""));

        let (runtime, _) = fx.started().await;
        assert_eq!(runtime.applied_tag(), "v0.0.0");
        assert_eq!(fx.stored_tag(), "v0.0.0");
    }

    #[tokio::test]
    async fn test_newer_tag_is_built_and_committed() {
        let fx = Fixture::new();
        fx.write_job(
            "",
            r#", "Docker": {"do_docker_build": true, "docker_image": "img",
                           "docker_user": "u", "docker_password": "p", "docker_server": "r"}"#,
        );
        fx.resolves("v1.0.0", SHA_A);
        fx.tags(&[("v1.0.0", SHA_A), ("v1.1.0", SHA_B)]);
        fx.runner.set_response("docker", CommandOutput::ok(""));

        let (mut runtime, pipeline) = fx.started().await;
        let report = runtime.cycle(&pipeline).await.unwrap();

        assert_eq!(report.candidate, "v1.1.0");
        assert!(report.committed);
        assert_eq!(fx.stored_tag(), "v1.1.0");
        assert_eq!(runtime.applied_commit.as_deref(), Some(SHA_B));
        assert_eq!(fx.runner.count(&format!("git checkout -f {}", SHA_B)), 1);
        assert_eq!(fx.runner.count("docker"), 2);
    }

    #[tokio::test]
    async fn test_moved_tag_triggers_release() {
        let fx = Fixture::new();
        fx.write_job("", r#", "Sync": {"do_subfolder_sync": true, "target_folder": "/srv/www"}"#);
        // Applied v1.0.0 was at A; the refreshed repository has it at B
        fx.resolves("v1.0.0", SHA_A);
        fx.tags(&[("v1.0.0", SHA_B)]);
        fx.runner.set_response("rsync", CommandOutput::ok(""));
        let target = fx.dir.path().join("www");
        let json = std::fs::read_to_string(fx.job_path())
            .unwrap()
            .replace("/srv/www", &target.to_string_lossy());
        std::fs::write(fx.job_path(), json).unwrap();

        let (mut runtime, pipeline) = fx.started().await;
        let report = runtime.cycle(&pipeline).await.unwrap();

        assert_eq!(report.candidate, "v1.0.0");
        assert!(report.committed);
        assert_eq!(fx.runner.count("rsync"), 1);
        assert_eq!(runtime.applied_commit.as_deref(), Some(SHA_B));
    }

    #[tokio::test]
    async fn test_unchanged_cycle_has_no_side_effects() {
        let fx = Fixture::new();
        fx.write_job(
            "",
            r#", "Docker": {"do_docker_build": true, "docker_image": "img",
                           "docker_user": "u", "docker_password": "p", "docker_server": "r"}"#,
        );
        std::fs::write(fx.state_path(), "v1.2.0").unwrap();
        fx.resolves("v1.2.0", SHA_C);
        fx.tags(&[("v1.1.0", SHA_B), ("v1.2.0", SHA_C)]);

        let (mut runtime, pipeline) = fx.started().await;
        let before = std::fs::metadata(fx.state_path()).unwrap().modified().unwrap();

        for _ in 0..2 {
            let report = runtime.cycle(&pipeline).await.unwrap();
            assert!(!report.committed);
        }

        assert_eq!(side_effects(&fx.runner), 0);
        assert_eq!(fx.stored_tag(), "v1.2.0");
        assert_eq!(
            std::fs::metadata(fx.state_path()).unwrap().modified().unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_pull_failure_aborts_job() {
        let fx = Fixture::new();
        fx.write_job("", "");
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.runner
            .set_response("git pull", CommandOutput::failed("connection reset"));

        let (mut runtime, pipeline) = fx.started().await;
        assert!(runtime.cycle(&pipeline).await.is_err());
        assert!(matches!(runtime.state, State::Aborting { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_unready_attempt_is_fatal() {
        let fx = Fixture::new();
        fx.write_job("", DEPLOY);
        fx.runner.set_response("kubectl config", CommandOutput::ok(""));
        fx.runner.set_response("kubectl apply -f -", CommandOutput::ok(""));
        fx.runner.set_response(
            "kubectl get deployment",
            CommandOutput::ok("2|1|registry.example.com/web:v1.0.0"),
        );
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A), ("v1.1.0", SHA_B)]);

        let err = fx.runtime(false).await.run().await.unwrap_err();

        assert!(matches!(
            err,
            TagpilotError::RetriesExhausted { ref tag, attempts: 4 } if tag == "v1.1.0"
        ));
        assert_eq!(fx.runner.count("kubectl apply"), 4);
        assert_eq!(fx.stored_tag(), "v1.0.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_candidate_resets_retries() {
        let fx = Fixture::new();
        fx.write_job("", DEPLOY);
        fx.runner.set_response("kubectl apply -f -", CommandOutput::ok(""));
        fx.runner.set_response(
            "kubectl get deployment",
            CommandOutput::ok("2|1|registry.example.com/web:v1.0.0"),
        );
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A), ("v1.1.0", SHA_B)]);

        let (mut runtime, pipeline) = fx.started().await;
        for _ in 0..3 {
            runtime.cycle(&pipeline).await.unwrap();
        }
        assert_eq!(runtime.retry.failures(), 3);

        fx.tags(&[("v1.0.0", SHA_A), ("v1.1.0", SHA_B), ("v1.2.0", SHA_C)]);
        runtime.cycle(&pipeline).await.unwrap();
        assert_eq!(runtime.retry.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_commits_when_cluster_confirms() {
        let fx = Fixture::new();
        fx.write_job("", DEPLOY);
        fx.runner.set_response("kubectl apply -f -", CommandOutput::ok(""));
        fx.runner.set_sequence(
            "kubectl get deployment",
            vec![
                // startup live tag query
                CommandOutput::ok("1|1|registry.example.com/web:v1.0.0"),
                CommandOutput::ok("1|1|registry.example.com/web:v1.1.0"),
            ],
        );
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A), ("v1.1.0", SHA_B)]);

        let (mut runtime, pipeline) = fx.started().await;
        let report = runtime.cycle(&pipeline).await.unwrap();

        assert!(report.committed);
        assert_eq!(fx.stored_tag(), "v1.1.0");
        assert_eq!(runtime.retry.failures(), 0);
    }

    #[tokio::test]
    async fn test_once_mode_runs_single_cycle() {
        let fx = Fixture::new();
        fx.write_job("", "");
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A)]);

        let outcome = fx.runtime(true).await.run().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Finished));
        assert_eq!(fx.runner.count("git pull"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edited_job_file_restarts() {
        let fx = Fixture::new();
        fx.write_job("", "");
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A)]);
        let runtime = fx.runtime(false).await;

        fx.write_job(r#", "variable_1": "edited""#, "");
        let outcome = runtime.run().await.unwrap();

        let JobOutcome::Restart(next) = outcome else {
            panic!("expected restart");
        };
        assert_eq!(next.spec.common.variable_1, "edited");
        assert_eq!(
            next.fingerprint,
            Fingerprint::of_file(&fx.job_path()).await.unwrap()
        );
        assert_eq!(fx.runner.count("git pull"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivated_job_suspends_until_reactivated() {
        let fx = Fixture::new();
        fx.write_job("", "");
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A)]);
        let runtime = fx.runtime(false).await;
        fx.write_job(r#", "is_active": false"#, "");

        let handle = tokio::spawn(runtime.run());
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!handle.is_finished());

        fx.write_job(r#", "is_active": true, "variable_2": "back""#, "");
        let outcome = handle.await.unwrap().unwrap();
        let JobOutcome::Restart(next) = outcome else {
            panic!("expected restart");
        };
        assert!(next.spec.is_active());
        assert_eq!(next.spec.common.variable_2, "back");
        // suspended instances do not reconcile
        assert_eq!(fx.runner.count("git pull"), 1);
    }

    #[tokio::test]
    async fn test_broken_job_file_ends_job() {
        let fx = Fixture::new();
        fx.write_job("", "");
        fx.runner.set_response("git rev-parse", CommandOutput::ok(SHA_A));
        fx.tags(&[("v1.0.0", SHA_A)]);
        let runtime = fx.runtime(false).await;

        std::fs::write(fx.job_path(), "{ not json").unwrap();
        assert!(runtime.run().await.is_err());
    }

    #[tokio::test]
    async fn test_state_path_is_derived_from_job_name() {
        let fx = Fixture::new();
        fx.write_job("", "");
        let spec = LoadedJob::read(&fx.job_path(), RunMode::Development)
            .await
            .unwrap()
            .spec;
        assert_eq!(spec.state_file_path(), fx.state_path());
        assert!(Path::new(&spec.git.git_local_folder).ends_with("repo"));
    }
}
