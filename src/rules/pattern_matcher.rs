//! Pattern matching for smart ignore rules and input filters
//!
//! Smart ignore rules are regular expressions matched against a difference's
//! property name, its full path, or either. Input filters used by file pair
//! discovery support both exact relative paths and glob patterns, auto-detected
//! from the pattern characters.

use anyhow::{anyhow, Result};
use glob::Pattern;
use regex::Regex;

use super::{MatchTarget, RuleError};

/// Compile a smart ignore pattern
pub fn compile_smart_pattern(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Match a compiled smart pattern against a difference's name and path
pub fn matches_smart_rule(regex: &Regex, target: MatchTarget, name: &str, path: &str) -> bool {
    match target {
        MatchTarget::Name => regex.is_match(name),
        MatchTarget::Path => regex.is_match(path),
        MatchTarget::Either => regex.is_match(name) || regex.is_match(path),
    }
}

/// Check if a filter string contains glob pattern characters
pub fn is_glob_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?') || filter.contains('[')
}

/// Match a relative input path against a filter using either exact or glob matching
pub fn matches_path_filter(relative_path: &str, filter: &str) -> bool {
    if is_glob_pattern(filter) {
        match Pattern::new(filter) {
            Ok(pattern) => pattern.matches(relative_path),
            Err(_) => relative_path == filter,
        }
    } else {
        relative_path == filter
    }
}

/// True when no filters are given, or when any filter matches (logical OR)
pub fn path_matches_filters(relative_path: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| matches_path_filter(relative_path, f))
}

/// Validate that all filters are syntactically correct glob patterns
pub fn validate_path_filters(filters: &[String]) -> Result<()> {
    for filter in filters {
        if is_glob_pattern(filter) {
            Pattern::new(filter).map_err(|e| anyhow!("Invalid glob pattern '{}': {}", filter, e))?;
        }
    }
    Ok(())
}

/// Validate smart ignore patterns without building a rule set
pub fn validate_smart_patterns(patterns: &[String]) -> Result<()> {
    for pattern in patterns {
        compile_smart_pattern(pattern)?;
    }
    Ok(())
}
