//! Tag codec and version selection
//!
//! Tags have the form `<prefix><major>.<minor>.<patch>`. Ordering is defined
//! by the decoded integer `major*10000 + minor*100 + patch`, never by string
//! comparison. Components are expected to stay within 0..=99; larger values
//! spill into the next order of magnitude (`1.100.0` decodes like `2.0.0`).
//! The encoding is persisted indirectly through state files, so it must stay
//! stable.

use std::cmp::Ordering;

use crate::{Result, TagpilotError};

/// Lowest tag a job will ever select on its own
pub const BASELINE_VERSION: &str = "1.0.0";

/// Ceiling used when a job does not configure one
pub const DEFAULT_CEILING_VERSION: &str = "99.99.99";

/// Encode three version components into the comparable integer form
pub fn encode(major: u64, minor: u64, patch: u64) -> u64 {
    major * 10_000 + minor * 100 + patch
}

/// Decode a prefixed tag into its comparable integer form
pub fn decode(tag: &str, prefix: &str) -> Result<u64> {
    let version = tag.strip_prefix(prefix).unwrap_or(tag);
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(TagpilotError::malformed(
            tag,
            format!("expected 3 version components, found {}", parts.len()),
        ));
    }

    let mut components = [0u64; 3];
    for (slot, (part, name)) in components
        .iter_mut()
        .zip(parts.iter().zip(["major", "minor", "patch"]))
    {
        *slot = parse_component(tag, part, name)?;
    }

    Ok(encode(components[0], components[1], components[2]))
}

fn parse_component(tag: &str, part: &str, name: &str) -> Result<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TagpilotError::malformed(
            tag,
            format!("{} version '{}' is not a decimal number", name, part),
        ));
    }
    part.parse::<u64>()
        .map_err(|e| TagpilotError::malformed(tag, format!("{} version: {}", name, e)))
}

/// Compare two tags by their decoded values
pub fn compare(a: &str, b: &str, prefix: &str) -> Result<Ordering> {
    Ok(decode(a, prefix)?.cmp(&decode(b, prefix)?))
}

/// Baseline tag (`<prefix>1.0.0`)
pub fn baseline(prefix: &str) -> String {
    format!("{}{}", prefix, BASELINE_VERSION)
}

/// The all-zero tag used to force a downgrade below the ceiling
pub fn zero_tag(prefix: &str) -> String {
    format!("{}0.0.0", prefix)
}

/// Pick the highest tag above the baseline and not above `ceiling`.
///
/// An empty `ceiling` means `<prefix>99.99.99`. When no candidate qualifies
/// the baseline is returned unchanged. A malformed candidate aborts the scan.
pub fn select_max<'a, I>(tags: I, ceiling: &str, prefix: &str) -> Result<(u64, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best_tag = baseline(prefix);
    let mut best = decode(&best_tag, prefix)?;

    let ceiling = if ceiling.is_empty() {
        format!("{}{}", prefix, DEFAULT_CEILING_VERSION)
    } else {
        ceiling.to_string()
    };
    let limit = decode(&ceiling, prefix)?;

    for tag in tags {
        let value = decode(tag, prefix)?;
        if value > best && value <= limit {
            best = value;
            best_tag = tag.to_string();
        }
    }

    Ok((best, best_tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_tags() {
        assert_eq!(decode("v1.2.3", "v").unwrap(), 10203);
        assert_eq!(decode("v0.0.0", "v").unwrap(), 0);
        assert_eq!(decode("release-99.99.99", "release-").unwrap(), 999999);
        assert_eq!(decode("2.10.4", "").unwrap(), 21004);
    }

    #[test]
    fn test_decode_matches_encode() {
        for major in [0, 1, 7, 42, 99] {
            for minor in [0, 5, 99] {
                for patch in [0, 1, 98, 99] {
                    let tag = format!("v{}.{}.{}", major, minor, patch);
                    assert_eq!(decode(&tag, "v").unwrap(), encode(major, minor, patch));
                }
            }
        }
    }

    #[test]
    fn test_decode_is_monotonic() {
        let ordered = [
            "v0.0.1", "v0.0.99", "v0.1.0", "v0.99.99", "v1.0.0", "v1.0.1", "v1.2.0", "v10.0.0",
        ];
        for pair in ordered.windows(2) {
            assert!(
                decode(pair[0], "v").unwrap() < decode(pair[1], "v").unwrap(),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_decode_overflow_spills_into_next_component() {
        // Components >= 100 are not rejected
        assert_eq!(decode("v1.100.0", "v").unwrap(), decode("v2.0.0", "v").unwrap());
    }

    #[test]
    fn test_decode_malformed() {
        for bad in ["v1.2", "v1.2.3.4", "v1.x.3", "v1..3", "v-1.2.3", "v1.2.3-rc1", ""] {
            let err = decode(bad, "v").unwrap_err();
            assert!(
                matches!(err, TagpilotError::MalformedTag { .. }),
                "expected malformed tag error for '{}'",
                bad
            );
        }
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare("v1.2.3", "v1.2.3", "v").unwrap(), Ordering::Equal);
        assert_eq!(compare("v1.2.3", "v1.10.0", "v").unwrap(), Ordering::Less);
        assert_eq!(compare("v2.0.0", "v1.99.99", "v").unwrap(), Ordering::Greater);
        // Lexical order would say otherwise
        assert_eq!(compare("v1.9.0", "v1.10.0", "v").unwrap(), Ordering::Less);
    }

    #[test]
    fn test_compare_antisymmetric_and_transitive() {
        let tags = ["v0.1.0", "v1.0.0", "v1.0.9", "v3.2.1"];
        for a in tags {
            assert_eq!(compare(a, a, "v").unwrap(), Ordering::Equal);
            for b in tags {
                assert_eq!(
                    compare(a, b, "v").unwrap(),
                    compare(b, a, "v").unwrap().reverse()
                );
                for c in tags {
                    if compare(a, b, "v").unwrap() == Ordering::Less
                        && compare(b, c, "v").unwrap() == Ordering::Less
                    {
                        assert_eq!(compare(a, c, "v").unwrap(), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_propagates_errors() {
        assert!(compare("v1.0.0", "vbad", "v").is_err());
        assert!(compare("vbad", "v1.0.0", "v").is_err());
    }

    #[test]
    fn test_select_max_empty_returns_baseline() {
        let (value, tag) = select_max(std::iter::empty(), "v5.0.0", "v").unwrap();
        assert_eq!(tag, "v1.0.0");
        assert_eq!(value, 10000);
    }

    #[test]
    fn test_select_max_respects_ceiling() {
        let tags = ["v1.2.0", "v1.3.0", "v2.0.0"];
        let (value, tag) = select_max(tags, "v1.9.9", "v").unwrap();
        assert_eq!(tag, "v1.3.0");
        assert_eq!(value, 10300);
    }

    #[test]
    fn test_select_max_ceiling_is_inclusive() {
        let tags = ["v1.2.0", "v2.0.0"];
        let (_, tag) = select_max(tags, "v2.0.0", "v").unwrap();
        assert_eq!(tag, "v2.0.0");
    }

    #[test]
    fn test_select_max_empty_ceiling_means_unbounded() {
        let tags = ["v1.2.0", "v42.0.1"];
        let (_, tag) = select_max(tags, "", "v").unwrap();
        assert_eq!(tag, "v42.0.1");
    }

    #[test]
    fn test_select_max_ignores_tags_at_or_below_baseline() {
        let tags = ["v0.9.0", "v1.0.0"];
        let (value, tag) = select_max(tags, "", "v").unwrap();
        assert_eq!(tag, "v1.0.0");
        assert_eq!(value, 10000);
    }

    #[test]
    fn test_select_max_fails_fast_on_malformed_candidate() {
        let tags = ["v1.2.0", "v1.bad.0", "v1.3.0"];
        assert!(select_max(tags, "", "v").is_err());
    }
}
