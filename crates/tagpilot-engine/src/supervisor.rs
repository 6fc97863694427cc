//! Job supervisor
//!
//! Every job runs in its own task. A job that ends with a restart request is
//! replaced by a fresh instance built from the reloaded configuration. One
//! job's failure never stops its siblings unless the error is process fatal
//! (missing registry credentials), in which case every job is aborted.

use std::time::Duration;
use tagpilot_core::LoadedJob;
use tagpilot_tools::CommandRunner;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{error, info, warn};

use crate::context::RuntimeContext;
use crate::runtime::{JobOutcome, JobRuntime};

/// How one job instance ended
#[derive(Debug)]
enum SlotEnd {
    Finished,
    Restart(Box<LoadedJob>),
    Failed { error: String, fatal: bool },
}

/// Aborts the wrapped job task when its slot is dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// What happened to the supervised jobs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Jobs started; a restarted job is not counted again
    pub started: usize,
    pub restarts: usize,
    pub finished: Vec<String>,
    /// `(job name, error)` for every job that stopped with an error
    pub failed: Vec<(String, String)>,
    /// The job whose fatal error aborted all others
    pub aborted_by: Option<String>,
}

impl SupervisorReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted_by.is_none()
    }
}

pub struct Supervisor<R: CommandRunner + Clone + 'static> {
    ctx: RuntimeContext<R>,
    slots: JoinSet<(String, SlotEnd)>,
    report: SupervisorReport,
}

impl<R: CommandRunner + Clone + 'static> Supervisor<R> {
    pub fn new(ctx: RuntimeContext<R>) -> Self {
        Self {
            ctx,
            slots: JoinSet::new(),
            report: SupervisorReport::default(),
        }
    }

    /// Number of job instances currently running
    pub fn running(&self) -> usize {
        self.slots.len()
    }

    /// Start one job immediately
    pub fn spawn(&mut self, job: LoadedJob) {
        self.spawn_after(job, Duration::ZERO);
    }

    /// Start jobs, spacing their first cycles by the configured start delay
    pub fn spawn_all(&mut self, jobs: Vec<LoadedJob>) {
        let delay = self.ctx.settings.start_delay;
        for (i, job) in jobs.into_iter().enumerate() {
            self.spawn_after(job, delay * i as u32);
        }
    }

    fn spawn_after(&mut self, job: LoadedJob, delay: Duration) {
        info!("Starting job '{}'", job.spec.name());
        self.report.started += 1;
        self.launch(job, delay);
    }

    fn launch(&mut self, job: LoadedJob, delay: Duration) {
        let name = job.spec.name().to_string();
        let runtime = JobRuntime::new(job, self.ctx.clone());

        self.slots.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // Inner task so a panic is reported against the job name
            let handle = tokio::spawn(runtime.run());
            let _guard = AbortOnDrop(handle.abort_handle());

            let end = match handle.await {
                Ok(Ok(JobOutcome::Finished)) => SlotEnd::Finished,
                Ok(Ok(JobOutcome::Restart(next))) => SlotEnd::Restart(next),
                Ok(Err(e)) => SlotEnd::Failed {
                    fatal: e.is_process_fatal(),
                    error: e.to_string(),
                },
                Err(join_err) if join_err.is_panic() => SlotEnd::Failed {
                    error: format!("job panicked: {}", panic_message(join_err.into_panic())),
                    fatal: false,
                },
                Err(join_err) => SlotEnd::Failed {
                    error: join_err.to_string(),
                    fatal: false,
                },
            };
            (name, end)
        });
    }

    /// Wait until every job has finished or failed
    pub async fn wait(&mut self) -> SupervisorReport {
        while let Some(result) = self.slots.join_next().await {
            match result {
                Ok((name, SlotEnd::Finished)) => {
                    info!("Job '{}' finished", name);
                    self.report.finished.push(name);
                }
                Ok((name, SlotEnd::Restart(next))) => {
                    info!("Restarting job '{}'", name);
                    self.report.restarts += 1;
                    self.launch(*next, Duration::ZERO);
                }
                Ok((name, SlotEnd::Failed { error, fatal })) => {
                    error!("Job '{}' failed: {}", name, error);
                    self.report.failed.push((name.clone(), error));
                    if fatal && self.report.aborted_by.is_none() {
                        error!("Fatal error in job '{}', stopping all jobs", name);
                        self.report.aborted_by = Some(name);
                        self.slots.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => warn!("Job slot ended abnormally: {}", join_err),
            }
        }

        std::mem::take(&mut self.report)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
