//! Content fingerprint of a job file, used to detect edits

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::Result;

/// SHA-256 of a job file's bytes, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash the current content of `path`
    pub async fn of_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell revisions apart in logs
        write!(f, "{}", &self.0[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let fp = Fingerprint::of_bytes(b"abc");
        assert_eq!(
            fp.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fp.to_string(), "ba7816bf8f01");
    }

    #[tokio::test]
    async fn test_file_edit_changes_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");

        std::fs::write(&path, "Common:\n  job_name: web\n").unwrap();
        let before = Fingerprint::of_file(&path).await.unwrap();
        assert_eq!(before, Fingerprint::of_file(&path).await.unwrap());

        std::fs::write(&path, "Common:\n  job_name: web\n  check_interval: 600\n").unwrap();
        let after = Fingerprint::of_file(&path).await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Fingerprint::of_file(&dir.path().join("gone.json")).await.is_err());
    }
}
