//! Comparison rule sets
//!
//! A `RuleSet` is the immutable union of:
//! - exact property-path ignore rules, optionally scoped to value, order or case
//! - pattern-based smart ignore rules matched against property name or path
//! - global collection-order and case-sensitivity toggles
//!
//! Changing a rule means building a new `RuleSet`, which carries a new
//! `Fingerprint`. Cache keys embed the fingerprint, so results computed under
//! an older rule set are never served for a newer one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::models::Difference;

pub mod pattern_matcher;

/// Length, in hex characters, of a rule-set fingerprint
const FINGERPRINT_HEX_LEN: usize = 32;

/// Bumped whenever the fingerprint input layout changes
const FINGERPRINT_VERSION: u32 = 1;

/// Stable hash of a rule set, part of every cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while building a rule set
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("ignore rule has an empty property path")]
    EmptyPath,
    #[error("invalid smart ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn default_true() -> bool {
    true
}

/// Exact property-path ignore rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub path: String,
    /// Suppress the path and everything beneath it
    #[serde(default = "default_true")]
    pub ignore_value: bool,
    /// Compare the collection at this path without regard to order
    #[serde(default)]
    pub ignore_order: bool,
    /// Compare text at this path case-insensitively
    #[serde(default)]
    pub ignore_case: bool,
}

impl IgnoreRule {
    /// Rule that suppresses the path entirely
    pub fn value(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ignore_value: true,
            ignore_order: false,
            ignore_case: false,
        }
    }

    /// Rule that only relaxes collection order at the path
    pub fn order(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ignore_value: false,
            ignore_order: true,
            ignore_case: false,
        }
    }

    /// Rule that only relaxes text case at the path
    pub fn case(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ignore_value: false,
            ignore_order: false,
            ignore_case: true,
        }
    }
}

/// What a smart ignore pattern is matched against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTarget {
    /// Property name (last path segment, index removed)
    Name,
    /// Full property path
    Path,
    #[default]
    Either,
}

/// Pattern-based post-filter over the difference list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmartIgnoreRule {
    #[serde(default)]
    pub name: String,
    /// Regular expression
    pub pattern: String,
    #[serde(default)]
    pub target: MatchTarget,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SmartIgnoreRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self {
            name: pattern.clone(),
            pattern,
            target: MatchTarget::Either,
            enabled: true,
        }
    }

    pub fn with_target(mut self, target: MatchTarget) -> Self {
        self.target = target;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PathFlags {
    ignore_value: bool,
    ignore_order: bool,
    ignore_case: bool,
}

/// Immutable rule set used for one comparison run
#[derive(Debug, Clone)]
pub struct RuleSet {
    ignore_rules: Vec<IgnoreRule>,
    smart_rules: Vec<SmartIgnoreRule>,
    compiled: Vec<Option<Regex>>,
    by_path: HashMap<String, PathFlags>,
    ignore_collection_order: bool,
    case_sensitive: bool,
    fingerprint: Fingerprint,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: u32,
    ignore_collection_order: bool,
    case_sensitive: bool,
    ignore: &'a [IgnoreRule],
    smart: &'a [SmartIgnoreRule],
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// Rule set with no rules and default toggles
    pub fn empty() -> Self {
        // An empty builder never fails
        match RuleSetBuilder::default().build() {
            Ok(rules) => rules,
            Err(_) => unreachable!("empty rule set is always valid"),
        }
    }

    /// Start a new builder seeded with this rule set's rules
    pub fn to_builder(&self) -> RuleSetBuilder {
        RuleSetBuilder {
            ignore_rules: self.ignore_rules.clone(),
            smart_rules: self.smart_rules.clone(),
            ignore_collection_order: self.ignore_collection_order,
            case_sensitive: self.case_sensitive,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn ignore_rules(&self) -> &[IgnoreRule] {
        &self.ignore_rules
    }

    pub fn smart_rules(&self) -> &[SmartIgnoreRule] {
        &self.smart_rules
    }

    pub fn ignores_collection_order(&self) -> bool {
        self.ignore_collection_order
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn is_empty(&self) -> bool {
        self.ignore_rules.is_empty() && self.smart_rules.is_empty()
    }

    /// Whether an exact ignore rule suppresses this path or one of its ancestors
    pub fn is_path_ignored(&self, path: &str) -> bool {
        self.any_ancestor(path, |flags| flags.ignore_value)
    }

    /// Whether the collection at this path is compared without regard to order
    pub fn is_order_insensitive(&self, path: &str) -> bool {
        self.ignore_collection_order || self.any_ancestor(path, |flags| flags.ignore_order)
    }

    /// Whether text at this path is compared case-insensitively
    pub fn is_case_insensitive(&self, path: &str) -> bool {
        !self.case_sensitive || self.any_ancestor(path, |flags| flags.ignore_case)
    }

    /// Whether any enabled smart rule drops this difference
    pub fn is_smart_ignored(&self, difference: &Difference) -> bool {
        let name = difference.property_name();
        self.smart_rules
            .iter()
            .zip(&self.compiled)
            .filter_map(|(rule, regex)| regex.as_ref().map(|re| (rule, re)))
            .any(|(rule, regex)| {
                pattern_matcher::matches_smart_rule(regex, rule.target, name, &difference.property_path)
            })
    }

    fn any_ancestor(&self, path: &str, predicate: impl Fn(&PathFlags) -> bool) -> bool {
        if self.by_path.is_empty() {
            return false;
        }
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            return false;
        }
        let mut end = 0;
        for segment in normalized.split('.') {
            end += segment.len();
            if let Some(flags) = self.by_path.get(&normalized[..end]) {
                if predicate(flags) {
                    return true;
                }
            }
            end += 1;
        }
        false
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

/// Builder producing an immutable, fingerprinted `RuleSet`
#[derive(Debug, Clone)]
pub struct RuleSetBuilder {
    ignore_rules: Vec<IgnoreRule>,
    smart_rules: Vec<SmartIgnoreRule>,
    ignore_collection_order: bool,
    case_sensitive: bool,
}

impl Default for RuleSetBuilder {
    fn default() -> Self {
        Self {
            ignore_rules: Vec::new(),
            smart_rules: Vec::new(),
            ignore_collection_order: false,
            case_sensitive: true,
        }
    }
}

impl RuleSetBuilder {
    /// Ignore a property path entirely
    pub fn ignore(self, path: impl Into<String>) -> Self {
        self.rule(IgnoreRule::value(path))
    }

    pub fn rule(mut self, rule: IgnoreRule) -> Self {
        self.ignore_rules.push(rule);
        self
    }

    pub fn smart(mut self, rule: SmartIgnoreRule) -> Self {
        self.smart_rules.push(rule);
        self
    }

    pub fn ignore_collection_order(mut self, enabled: bool) -> Self {
        self.ignore_collection_order = enabled;
        self
    }

    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    /// Remove every exact rule whose normalized path matches
    pub fn remove_rule(mut self, path: &str) -> Self {
        let target = normalize_rule_path(path);
        self.ignore_rules.retain(|r| normalize_rule_path(&r.path) != target);
        self
    }

    /// Remove every smart rule with this pattern
    pub fn remove_smart(mut self, pattern: &str) -> Self {
        self.smart_rules.retain(|r| r.pattern != pattern);
        self
    }

    /// Normalize, merge duplicates, compile patterns and compute the fingerprint
    pub fn build(self) -> Result<RuleSet, RuleError> {
        let mut by_path: HashMap<String, PathFlags> = HashMap::new();
        for rule in &self.ignore_rules {
            let normalized = normalize_rule_path(&rule.path);
            if normalized.is_empty() {
                return Err(RuleError::EmptyPath);
            }
            let flags = by_path.entry(normalized).or_default();
            flags.ignore_value |= rule.ignore_value;
            flags.ignore_order |= rule.ignore_order;
            flags.ignore_case |= rule.ignore_case;
        }

        let mut ignore_rules: Vec<IgnoreRule> = by_path
            .iter()
            .map(|(path, flags)| IgnoreRule {
                path: path.clone(),
                ignore_value: flags.ignore_value,
                ignore_order: flags.ignore_order,
                ignore_case: flags.ignore_case,
            })
            .collect();
        ignore_rules.sort_by(|a, b| a.path.cmp(&b.path));

        let mut smart_rules = self.smart_rules;
        smart_rules.sort_by(|a, b| {
            (&a.pattern, a.target, &a.name, a.enabled).cmp(&(&b.pattern, b.target, &b.name, b.enabled))
        });
        smart_rules.dedup();

        let compiled = smart_rules
            .iter()
            .map(|rule| {
                if rule.enabled {
                    pattern_matcher::compile_smart_pattern(&rule.pattern).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fingerprint = compute_fingerprint(&FingerprintInput {
            version: FINGERPRINT_VERSION,
            ignore_collection_order: self.ignore_collection_order,
            case_sensitive: self.case_sensitive,
            ignore: &ignore_rules,
            smart: &smart_rules,
        });

        Ok(RuleSet {
            ignore_rules,
            smart_rules,
            compiled,
            by_path,
            ignore_collection_order: self.ignore_collection_order,
            case_sensitive: self.case_sensitive,
            fingerprint,
        })
    }
}

fn compute_fingerprint(input: &FingerprintInput<'_>) -> Fingerprint {
    // Serializing plain structs of strings and bools cannot fail
    let serialized = serde_json::to_vec(input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    let full = hex::encode(hasher.finalize());
    Fingerprint(full[..FINGERPRINT_HEX_LEN].to_string())
}

fn backing_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<([^>]+)>k__BackingField").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Canonical form of a difference path: backing-field aliases resolved and
/// index markers (`[0]`, `[*]`) removed
pub fn normalize_path(path: &str) -> String {
    let resolved = backing_field_regex().replace_all(path, "$1");
    let mut out = String::with_capacity(resolved.len());
    let mut depth = 0usize;
    for c in resolved.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Canonical form of a rule path; additionally drops a trailing `.Item` indexer
pub fn normalize_rule_path(path: &str) -> String {
    let normalized = normalize_path(path.trim());
    match normalized.strip_suffix(".Item") {
        Some(stripped) => stripped.to_string(),
        None if normalized == "Item" => String::new(),
        None => normalized,
    }
}

/// Number of index markers in a path
pub fn index_segment_count(path: &str) -> usize {
    path.matches('[').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DifferenceCategory;

    fn diff(path: &str) -> Difference {
        Difference::new(path, DifferenceCategory::TextChanged, Some("a".into()), Some("b".into()))
    }

    #[test]
    fn test_normalize_path_variants() {
        assert_eq!(normalize_path("Items[0].Sku"), "Items.Sku");
        assert_eq!(normalize_path("Items[*].Sku"), "Items.Sku");
        assert_eq!(normalize_path("<Name>k__BackingField"), "Name");
        assert_eq!(normalize_path("Order.<Total>k__BackingField"), "Order.Total");
        assert_eq!(normalize_rule_path("Items.Item"), "Items");
        assert_eq!(normalize_rule_path(" Items[0] "), "Items");
    }

    #[test]
    fn test_ignore_rule_suppresses_index_variants() {
        for written in ["Items", "Items[0]", "Items[*]", "Items.Item"] {
            let rules = RuleSet::builder().ignore(written).build().unwrap();
            assert!(rules.is_path_ignored("Items"), "rule {written}");
            assert!(rules.is_path_ignored("Items[3]"), "rule {written}");
            assert!(rules.is_path_ignored("Items[3].Sku"), "rule {written}");
            assert!(!rules.is_path_ignored("ItemsTotal"), "rule {written}");
        }
    }

    #[test]
    fn test_order_and_case_scoped_rules_do_not_ignore_value() {
        let rules = RuleSet::builder()
            .rule(IgnoreRule::order("Tags"))
            .rule(IgnoreRule::case("Customer.Name"))
            .build()
            .unwrap();

        assert!(!rules.is_path_ignored("Tags"));
        assert!(rules.is_order_insensitive("Tags"));
        assert!(!rules.is_order_insensitive("Other"));
        assert!(rules.is_case_insensitive("Customer.Name"));
        assert!(!rules.is_case_insensitive("Customer.Email"));
    }

    #[test]
    fn test_global_toggles() {
        let rules = RuleSet::builder()
            .ignore_collection_order(true)
            .case_sensitive(false)
            .build()
            .unwrap();
        assert!(rules.is_order_insensitive("Anything"));
        assert!(rules.is_case_insensitive("Anything"));
    }

    #[test]
    fn test_duplicate_rule_is_idempotent() {
        let once = RuleSet::builder().ignore("Id").build().unwrap();
        let twice = RuleSet::builder().ignore("Id").ignore("Id").build().unwrap();
        assert_eq!(once.fingerprint(), twice.fingerprint());
        assert_eq!(once.ignore_rules(), twice.ignore_rules());
    }

    #[test]
    fn test_fingerprint_is_order_normalized() {
        let a = RuleSet::builder().ignore("Id").ignore("Timestamp").build().unwrap();
        let b = RuleSet::builder().ignore("Timestamp").ignore("Id").build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_on_add_and_remove() {
        let base = RuleSet::builder().ignore("Id").build().unwrap();
        let added = base.to_builder().ignore("CreatedAt").build().unwrap();
        let removed = added.to_builder().remove_rule("CreatedAt").build().unwrap();
        let smart = base.to_builder().smart(SmartIgnoreRule::new("(?i)timestamp")).build().unwrap();
        let toggled = base.to_builder().ignore_collection_order(true).build().unwrap();

        assert_ne!(base.fingerprint(), added.fingerprint());
        assert_eq!(base.fingerprint(), removed.fingerprint());
        assert_ne!(base.fingerprint(), smart.fingerprint());
        assert_ne!(base.fingerprint(), toggled.fingerprint());
        assert_ne!(RuleSet::empty().fingerprint(), base.fingerprint());
    }

    #[test]
    fn test_disabled_smart_rule_changes_fingerprint_but_not_filtering() {
        let rule = SmartIgnoreRule::new("^Id$");
        let enabled = RuleSet::builder().smart(rule.clone()).build().unwrap();
        let disabled = RuleSet::builder().smart(rule.disabled()).build().unwrap();

        assert_ne!(enabled.fingerprint(), disabled.fingerprint());
        assert!(enabled.is_smart_ignored(&diff("Order.Id")));
        assert!(!disabled.is_smart_ignored(&diff("Order.Id")));
    }

    #[test]
    fn test_smart_rule_targets() {
        let by_name = RuleSet::builder()
            .smart(SmartIgnoreRule::new("^Timestamp$").with_target(MatchTarget::Name))
            .build()
            .unwrap();
        assert!(by_name.is_smart_ignored(&diff("Audit.Timestamp")));
        assert!(!by_name.is_smart_ignored(&diff("Audit.TimestampZone")));

        let by_path = RuleSet::builder()
            .smart(SmartIgnoreRule::new(r"^Audit\.").with_target(MatchTarget::Path))
            .build()
            .unwrap();
        assert!(by_path.is_smart_ignored(&diff("Audit.User")));
        assert!(!by_path.is_smart_ignored(&diff("Order.Audit")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = RuleSet::builder().smart(SmartIgnoreRule::new("(unclosed")).build().unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let err = RuleSet::builder().ignore("[0]").build().unwrap_err();
        assert!(matches!(err, RuleError::EmptyPath));
    }
}
