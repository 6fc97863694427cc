//! Deployment manifest rendering
//!
//! Templates reference `{{ .Release }}`, `{{ .Image }}` and `{{ .PgSecrets }}`.
//! Quoted placeholders such as `"{{ .Image }}"` lose their quotes first so the
//! rendered value is not double quoted.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tagpilot_core::{Result, TagpilotError};

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""(\{\{[^}]*\}\})"|'(\{\{[^}]*\}\})'"#).expect("static regex is valid")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("static regex is valid"))
}

/// Values available to a manifest template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBindings {
    /// The release tag being deployed
    pub release: String,
    /// Full image reference including tag
    pub image: String,
    pub pg_secrets: String,
}

impl ManifestBindings {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            ".Release" => Some(&self.release),
            ".Image" => Some(&self.image),
            ".PgSecrets" => Some(&self.pg_secrets),
            _ => None,
        }
    }
}

/// Render template text
pub fn render(template: &str, bindings: &ManifestBindings) -> Result<String> {
    let unquoted = quoted_pattern().replace_all(template, "$1$2");

    let mut unknown = None;
    let rendered = placeholder_pattern().replace_all(&unquoted, |caps: &regex::Captures<'_>| {
        match bindings.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                unknown.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match unknown {
        Some(key) => Err(TagpilotError::Render(format!(
            "unknown placeholder '{{{{ {} }}}}'",
            key
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// Read and render a template file
pub async fn render_file(path: &Path, bindings: &ManifestBindings) -> Result<String> {
    let template = tokio::fs::read_to_string(path).await.map_err(|e| {
        TagpilotError::Render(format!("failed to read template {}: {}", path.display(), e))
    })?;
    render(&template, bindings)
}
