//! Placeholder substitution for job files
//!
//! Two kinds of placeholders are supported:
//! - `{{$NAME}}` is replaced by environment variable `NAME` before parsing
//! - `{{ThisConfig:Section:field}}` is replaced by another field of the same
//!   job after parsing (see [`crate::JobSpec::reference`])

use regex::Regex;
use std::sync::OnceLock;

use crate::{Result, TagpilotError};

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\$(.*?)\}\}").expect("static regex is valid"))
}

fn self_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{ThisConfig:(.*?)\}\}").expect("static regex is valid"))
}

/// Replace `{{$NAME}}` tokens using `lookup`; unknown names become empty
pub fn replace_env_tokens<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env_pattern()
        .replace_all(content.trim(), |caps: &regex::Captures<'_>| {
            lookup(caps[1].trim()).unwrap_or_default()
        })
        .into_owned()
}

/// Replace `{{$NAME}}` tokens from the process environment
pub fn replace_env(content: &str) -> String {
    replace_env_tokens(content, |name| std::env::var(name).ok())
}

/// Replace `{{ThisConfig:key}}` tokens using `resolve`.
///
/// Returns `None` when the value contains no token. An unresolvable key is an
/// error rather than an empty string.
pub fn replace_self_tokens<F>(value: &str, resolve: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if !self_pattern().is_match(value) {
        return Ok(None);
    }

    let mut missing = None;
    let replaced = self_pattern().replace_all(value, |caps: &regex::Captures<'_>| {
        let key = caps[1].trim();
        match resolve(key) {
            Some(v) => v,
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(TagpilotError::Config(format!(
            "unknown self reference '{{{{ThisConfig:{}}}}}'",
            key
        ))),
        None => Ok(Some(replaced.into_owned())),
    }
}
