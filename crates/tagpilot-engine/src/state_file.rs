//! Persisted applied-tag file
//!
//! One plain-text file per job holding the last successfully applied tag.
//! Writes go through a sibling temporary file and a rename, so a crash never
//! leaves a truncated tag behind.

use std::path::{Path, PathBuf};
use tagpilot_core::{Result, TagpilotError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTagState {
    path: PathBuf,
}

impl PersistedTagState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored tag, `None` if the file is absent or empty
    pub async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let tag = content.trim();
                Ok((!tag.is_empty()).then(|| tag.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TagpilotError::State(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub async fn write(&self, tag: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let wrap = |e: std::io::Error| {
            TagpilotError::State(format!("failed to write {}: {}", self.path.display(), e))
        };
        tokio::fs::write(&tmp, tag.as_bytes()).await.map_err(wrap)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(wrap)?;

        debug!("Persisted applied tag {} to {}", tag, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistedTagState::new(dir.path().join("start-tag-file.web"));
        assert_eq!(state.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistedTagState::new(dir.path().join("state").join("start-tag-file.web"));

        state.write("v1.2.3").await.unwrap();
        assert_eq!(state.read().await.unwrap().as_deref(), Some("v1.2.3"));

        state.write("v1.2.4").await.unwrap();
        assert_eq!(state.read().await.unwrap().as_deref(), Some("v1.2.4"));
        assert!(!dir.path().join("state").join("start-tag-file.web.tmp").exists());
    }

    #[tokio::test]
    async fn test_whitespace_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag");
        std::fs::write(&path, "  v2.0.0\n").unwrap();
        let state = PersistedTagState::new(&path);
        assert_eq!(state.read().await.unwrap().as_deref(), Some("v2.0.0"));

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(state.read().await.unwrap(), None);
    }
}
