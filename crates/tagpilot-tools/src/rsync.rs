//! One-way directory mirroring with `rsync`

use std::path::Path;
use tagpilot_core::{Result, TagpilotError};
use tracing::{debug, instrument};

use crate::command::{CommandRunner, CommandSpec};

/// Mirror the contents of `source` into `target`, deleting extraneous files
///
/// Executes: `rsync -avzh --delete --recursive {source}/ {target}`
#[instrument(skip(runner), fields(source = %source.display(), target = %target.display()))]
pub async fn mirror<R: CommandRunner>(runner: &R, source: &Path, target: &Path) -> Result<()> {
    if !tokio::fs::try_exists(source).await? {
        return Err(TagpilotError::Sync(format!(
            "source folder {} does not exist",
            source.display()
        )));
    }
    tokio::fs::create_dir_all(target).await?;

    // Trailing slash copies the folder's contents rather than the folder itself
    let source = format!("{}/", source.to_string_lossy().trim_end_matches('/'));
    let target = target.to_string_lossy().to_string();
    let output = runner
        .run(&CommandSpec::new("rsync").args([
            "-avzh",
            "--delete",
            "--recursive",
            source.as_str(),
            target.as_str(),
        ]))
        .await?
        .check("rsync", TagpilotError::Sync)?;

    debug!("rsync: {}", output.stdout.lines().last().unwrap_or_default());
    Ok(())
}
