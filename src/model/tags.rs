//! Tag sets and name validation
//!
//! Tags are kept in a `BTreeMap` so iteration is always in ascending key
//! order. Sub-metric names are derived from that order.

use crate::error::{FederationError, FederationResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Tag key → tag value
pub type Tags = BTreeMap<String, String>;

/// Maximum number of tags a single series may carry
pub const MAX_NUM_TAGS: usize = 8;

/// Check that a metric name, tag key or tag value only uses allowed characters
///
/// Allowed: letters, ASCII digits, `-`, `_`, `.` and `/`.
pub fn validate_string(kind: &str, s: &str) -> FederationResult<()> {
    if s.is_empty() {
        return Err(FederationError::Validation(format!("empty {}", kind)));
    }

    if let Some(m) = illegal_chars()?.find(s) {
        return Err(FederationError::Validation(format!(
            "invalid {} ({:?}): illegal character {:?}",
            kind,
            s,
            m.as_str()
        )));
    }

    Ok(())
}

fn illegal_chars() -> FederationResult<&'static Regex> {
    static ILLEGAL: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    ILLEGAL
        .get_or_init(|| Regex::new(r"[^\p{L}0-9\-_./]"))
        .as_ref()
        .map_err(|e| FederationError::Validation(format!("name pattern: {}", e)))
}

/// Validate a series identity before any point is routed for it
pub fn check_metric_and_tags(metric: &str, tags: &Tags) -> FederationResult<()> {
    if tags.is_empty() {
        return Err(FederationError::Validation(format!(
            "need at least one tag (metric={})",
            metric
        )));
    }
    if tags.len() > MAX_NUM_TAGS {
        return Err(FederationError::Validation(format!(
            "too many tags: {} maximum allowed: {}",
            tags.len(),
            MAX_NUM_TAGS
        )));
    }

    validate_string("metric name", metric)?;
    for (key, value) in tags {
        validate_string("tag name", key)?;
        validate_string("tag value", value)?;
    }
    Ok(())
}

/// Parse a single `key=value` argument into `tags`
///
/// Rejects malformed pairs and keys that are already present.
pub fn parse_tag(tags: &mut Tags, arg: &str) -> FederationResult<()> {
    let (key, value) = match arg.split_once('=') {
        Some((k, v)) if !k.is_empty() && !v.is_empty() && !v.contains('=') => (k, v),
        _ => {
            return Err(FederationError::Validation(format!(
                "got: {} but should be: key=value",
                arg
            )))
        }
    };

    if tags.contains_key(key) {
        return Err(FederationError::Validation(format!(
            "collision in keys: {}",
            key
        )));
    }

    tags.insert(key.to_string(), value.to_string());
    Ok(())
}

/// Parse whitespace separated `key=value` pairs, e.g. `"cluster=a host=web01"`
pub fn parse_tags(s: &str) -> FederationResult<Tags> {
    let mut tags = Tags::new();
    for arg in s.split_whitespace() {
        parse_tag(&mut tags, arg)?;
    }
    Ok(tags)
}
