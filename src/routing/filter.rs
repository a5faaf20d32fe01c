//! Route pattern validation and matching
//!
//! Key rules:
//! - `#` must occupy the entire final level
//! - `+` must occupy an entire level, and only segment mode accepts it
//! - Prefix mode compares the pattern minus its `#` as a raw string prefix,
//!   so `sensors/te` matches `sensors/temp` and `sensors/test/1`

use regex::Regex;

use super::{MatchMode, RouteError};

/// Validate a route pattern for the given match mode
pub fn validate_pattern(pattern: &str, mode: MatchMode) -> Result<(), RouteError> {
    let invalid = |reason: &'static str| RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Err(RouteError::EmptyPattern);
    }
    if pattern.len() > 65535 {
        return Err(invalid("pattern exceeds maximum topic length"));
    }
    if pattern.contains('\0') {
        return Err(invalid("pattern cannot contain null character"));
    }

    let levels: Vec<&str> = pattern.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(invalid("multi-level wildcard must occupy entire level"));
            }
            if i != levels.len() - 1 {
                return Err(invalid("multi-level wildcard must be last level"));
            }
        }

        if level.contains('+') {
            if mode == MatchMode::Prefix {
                return Err(RouteError::UnsupportedWildcard(pattern.to_string()));
            }
            if *level != "+" {
                return Err(invalid("single-level wildcard must occupy entire level"));
            }
        }
    }

    Ok(())
}

/// Compile a prefix-mode pattern into an anchored regex
///
/// The trailing `#` is dropped and the remainder escaped, so `#` alone
/// compiles to `^` and matches every topic.
pub fn compile_prefix(pattern: &str) -> Result<Regex, RouteError> {
    let prefix = pattern.strip_suffix('#').unwrap_or(pattern);
    Regex::new(&format!("^{}", regex::escape(prefix))).map_err(RouteError::Regex)
}

/// Check if a segment-mode pattern matches a topic name
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level
/// - # matches zero or more levels (must be last)
/// - $-topics don't match patterns starting with + or #
pub fn segment_matches(topic: &str, pattern: &str) -> bool {
    if topic.starts_with('$') && pattern.starts_with(['+', '#']) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for pattern_level in pattern.split('/') {
        if pattern_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(level) if pattern_level == "+" || pattern_level == level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
