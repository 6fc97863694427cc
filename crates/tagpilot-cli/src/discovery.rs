//! Job file discovery and loading

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tagpilot_core::{LoadedJob, RunMode};
use tracing::{debug, info};

/// Where to look for job files
#[derive(Debug, Default, Clone)]
pub struct JobSources {
    /// Directory scanned recursively
    pub folder: Option<PathBuf>,
    /// A single job file, or a file name pattern when `folder` is set
    pub jobfile: Option<String>,
    /// Extra job files given as arguments
    pub files: Vec<PathBuf>,
}

/// Resolve the job file paths, falling back to `<exe_dir>/config.json`
pub fn collect(sources: &JobSources, exe_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    match (&sources.folder, &sources.jobfile) {
        (Some(folder), pattern) => {
            let pattern = pattern
                .as_deref()
                .map(glob::Pattern::new)
                .transpose()
                .context("Invalid job file pattern")?;
            walk(folder, &mut paths)
                .with_context(|| format!("Failed to scan {}", folder.display()))?;
            if let Some(pattern) = pattern {
                paths.retain(|p| {
                    p.file_name()
                        .map(|name| pattern.matches(&name.to_string_lossy()))
                        .unwrap_or(false)
                });
            }
        }
        (None, Some(file)) => paths.push(PathBuf::from(file)),
        (None, None) => {}
    }

    paths.extend(sources.files.iter().cloned());

    if paths.is_empty() {
        let default = exe_dir.join("config.json");
        debug!("No job files given, using {}", default.display());
        paths.push(default);
    }

    Ok(paths)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Load every job file, keeping only `jobname` when given
pub async fn load_jobs(
    paths: &[PathBuf],
    mode: RunMode,
    jobname: Option<&str>,
) -> Result<Vec<LoadedJob>> {
    let mut jobs = Vec::new();
    let mut names = HashSet::new();

    for path in paths {
        let job = LoadedJob::read(path, mode)
            .await
            .with_context(|| format!("Failed to load job file {}", path.display()))?;

        if jobname.is_some_and(|wanted| wanted != job.spec.name()) {
            debug!("Skipping job '{}'", job.spec.name());
            continue;
        }
        if !names.insert(job.spec.name().to_string()) {
            bail!(
                "Duplicate job name '{}' in {}",
                job.spec.name(),
                path.display()
            );
        }

        info!("Loaded job '{}' from {}", job.spec.name(), path.display());
        jobs.push(job);
    }

    if let Some(wanted) = jobname {
        if jobs.is_empty() {
            bail!("No job named '{}'", wanted);
        }
    }
    Ok(jobs)
}
