//! tagpilot - GitOps continuous deployment agent
//!
//! Usage:
//!   tagpilot -f web.json              Run one job file
//!   tagpilot -j /etc/tagpilot         Run every job file under a folder
//!   tagpilot -j jobs -f '*.yaml'      Run matching job files under a folder
//!   tagpilot -f web.json --oncerun    Run a single cycle and exit

mod discovery;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tagpilot_core::RunMode;
use tagpilot_engine::{RuntimeContext, RuntimeSettings, Supervisor};
use tagpilot_tools::{docker, ProcessRunner};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use discovery::JobSources;

/// Exit status after an interrupt
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "tagpilot")]
#[command(author, version, about = "Deploy the newest semantic version tag of each repository")]
struct Cli {
    /// Folder scanned recursively for job files
    #[arg(short = 'j', long, value_name = "DIR")]
    jobs_folder: Option<PathBuf>,

    /// Job file, or a file name pattern when --jobs-folder is given
    #[arg(short = 'f', long, value_name = "FILE")]
    jobfile: Option<String>,

    /// Run only the job with this name
    #[arg(short = 'n', long, value_name = "NAME")]
    jobname: Option<String>,

    /// Seconds between the starts of consecutive jobs
    #[arg(short = 'd', long, default_value = "0")]
    delay: u64,

    /// Run one reconciliation cycle per job, then exit
    #[arg(long)]
    oncerun: bool,

    /// Where registry credentials are written (default: $HOME/.tagpilot/docker)
    #[arg(long, value_name = "DIR")]
    credentials_dir: Option<PathBuf>,

    /// production or development; development allows short check intervals
    #[arg(long, env = "TAGPILOT_MODE", default_value = "production")]
    mode: RunMode,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Additional job files
    files: Vec<PathBuf>,
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

fn default_credentials_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".tagpilot")
        .join("docker")
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate the tagpilot executable")?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

fn cleanup_credentials(dir: &Path) {
    match docker::remove_credentials(dir) {
        Ok(true) => info!("Removed registry credentials from {}", dir.display()),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove registry credentials: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let sources = JobSources {
        folder: cli.jobs_folder,
        jobfile: cli.jobfile,
        files: cli.files,
    };
    let paths = discovery::collect(&sources, &executable_dir()?)?;
    let jobs = discovery::load_jobs(&paths, cli.mode, cli.jobname.as_deref()).await?;

    let settings = RuntimeSettings {
        mode: cli.mode,
        once: cli.oncerun,
        credentials_dir: cli
            .credentials_dir
            .unwrap_or_else(default_credentials_dir),
        start_delay: Duration::from_secs(cli.delay),
        ssh_auth_sock: std::env::var("SSH_AUTH_SOCK").ok(),
    };
    let credentials_dir = settings.credentials_dir.clone();
    info!(
        "Running {} job(s) in {:?} mode{}",
        jobs.len(),
        settings.mode,
        if settings.once { ", single cycle" } else { "" }
    );

    let mut supervisor = Supervisor::new(RuntimeContext::new(ProcessRunner::new(), settings));
    supervisor.spawn_all(jobs);

    let report = tokio::select! {
        report = supervisor.wait() => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cleaning up");
            cleanup_credentials(&credentials_dir);
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    };

    info!(
        "{} job(s) started, {} restart(s), {} finished, {} failed",
        report.started,
        report.restarts,
        report.finished.len(),
        report.failed.len()
    );

    if let Some(job) = &report.aborted_by {
        error!("Stopped after a fatal error in job '{}'", job);
        cleanup_credentials(&credentials_dir);
        std::process::exit(1);
    }
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
