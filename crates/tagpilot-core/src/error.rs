//! Unified error types for tagpilot

use thiserror::Error;

/// Unified error type for all tagpilot operations
#[derive(Error, Debug)]
pub enum TagpilotError {
    // Tag errors
    #[error("Malformed tag '{tag}': {reason}")]
    MalformedTag { tag: String, reason: String },

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // Pipeline stage errors
    #[error("Git error: {0}")]
    Git(String),

    #[error("Image build error: {0}")]
    Build(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Deploy error: {0}")]
    Deploy(String),

    #[error("Manifest render error: {0}")]
    Render(String),

    // Credential errors
    #[error("Registry credentials error: {0}")]
    Credentials(String),

    #[error("Key agent error: {0}")]
    KeyAgent(String),

    // External process errors
    #[error("Command failed: {0}")]
    Command(String),

    // Persisted state errors
    #[error("State file error: {0}")]
    State(String),

    #[error("Release {tag} was not applied after {attempts} attempts")]
    RetriesExhausted { tag: String, attempts: u32 },

    // I/O and parsing errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TagpilotError {
    /// Errors that stop the whole process rather than one job.
    ///
    /// Only registry credentials missing from the job and the environment
    /// qualify; a failed login ends just the job that attempted it.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }

    pub(crate) fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTag {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using TagpilotError
pub type Result<T> = std::result::Result<T, TagpilotError>;
