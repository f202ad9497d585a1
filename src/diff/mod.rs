//! Structural difference engine
//!
//! Pure function from (document A, document B, rule set) to a filtered list of
//! differences. Both trees are walked in parallel by property path:
//! - exact ignore rules prune a path and everything beneath it
//! - collections are compared positionally, or aligned by value when the
//!   applicable rule marks them order-insensitive
//! - categories come from the runtime types of the two values
//! - smart ignore rules drop differences as they are produced
//!
//! The walk is bounded twice: by nesting depth (a differing subtree below the
//! limit aborts with one synthetic difference) and by the difference cap.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::constants::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_DIFFERENCES, DEPTH_ABORT_MESSAGE, MAX_DEPTH_LIMIT};
use crate::document::{join_field, join_index, Document, Field, TypeTag, Value};
use crate::models::{ComparisonResult, Difference, DifferenceCategory};
use crate::rules::RuleSet;

pub mod collections;
pub mod dedup;

pub use collections::{align_unordered, Alignment};
pub use dedup::{deduplicate, DedupPolicy};

static NULL_VALUE: Value = Value::Null;

/// Anything that can compare two decoded documents under a rule set
///
/// The pipeline holds the engine behind this trait so tests can count calls.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &Document, b: &Document, rules: &RuleSet) -> ComparisonResult;
}

impl<C: Comparator + ?Sized> Comparator for Arc<C> {
    fn compare(&self, a: &Document, b: &Document, rules: &RuleSet) -> ComparisonResult {
        (**self).compare(a, b, rules)
    }
}

/// Configured difference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffEngine {
    max_depth: usize,
    max_differences: usize,
    dedup_policy: DedupPolicy,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_differences: DEFAULT_MAX_DIFFERENCES,
            dedup_policy: DedupPolicy::default(),
        }
    }
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nesting depth below which differing subtrees abort the walk
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.clamp(1, MAX_DEPTH_LIMIT);
        self
    }

    /// Differences kept before the walk stops with `truncated` set
    pub fn with_max_differences(mut self, cap: usize) -> Self {
        self.max_differences = cap.max(1);
        self
    }

    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_differences(&self) -> usize {
        self.max_differences
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup_policy
    }

    /// Compare two documents under a rule set
    pub fn compare(&self, a: &Document, b: &Document, rules: &RuleSet) -> ComparisonResult {
        let mut walk = Walk {
            engine: self,
            rules,
            differences: Vec::new(),
            truncated: false,
            stopped: false,
        };
        walk.node("", a.root(), b.root(), 0, false);

        let differences = deduplicate(walk.differences, self.dedup_policy);
        ComparisonResult {
            are_equal: differences.is_empty(),
            differences,
            truncated: walk.truncated,
            fingerprint: rules.fingerprint().clone(),
        }
    }
}

impl Comparator for DiffEngine {
    fn compare(&self, a: &Document, b: &Document, rules: &RuleSet) -> ComparisonResult {
        DiffEngine::compare(self, a, b, rules)
    }
}

struct Walk<'a> {
    engine: &'a DiffEngine,
    rules: &'a RuleSet,
    differences: Vec<Difference>,
    truncated: bool,
    stopped: bool,
}

impl Walk<'_> {
    fn node(&mut self, path: &str, a: &Value, b: &Value, depth: usize, in_collection: bool) {
        if self.stopped || (!path.is_empty() && self.rules.is_path_ignored(path)) {
            return;
        }

        let containers = matches!(
            (a, b),
            (Value::Object(_), Value::Object(_)) | (Value::Collection(_), Value::Collection(_))
        );
        if containers && depth >= self.engine.max_depth {
            if !self.equivalent(path, a, b) {
                self.abort_depth(path);
            }
            return;
        }

        match (a, b) {
            (Value::Object(_), Value::Object(_)) => self.object(path, a, b, depth),
            (Value::Collection(items_a), Value::Collection(items_b)) => {
                self.collection(path, items_a, items_b, depth)
            }
            _ => {
                if !self.equivalent(path, a, b) {
                    let category = categorize(a, b, in_collection);
                    self.emit(Difference::new(path, category, a.render(), b.render()));
                }
            }
        }
    }

    fn object(&mut self, path: &str, a: &Value, b: &Value, depth: usize) {
        for (name, value_a, value_b) in zip_fields(a, b) {
            if self.stopped {
                return;
            }
            let child = join_field(path, name);
            self.node(&child, value_a, value_b, depth + 1, false);
        }
    }

    fn collection(&mut self, path: &str, a: &[Value], b: &[Value], depth: usize) {
        if self.rules.is_order_insensitive(path) {
            let element_path = format!("{}[*]", path);
            let alignment = align_unordered(a, b, |x, y| self.equivalent(&element_path, x, y));
            for (i, j) in alignment.paired {
                self.node(&join_index(path, i), &a[i], &b[j], depth + 1, true);
            }
            for i in alignment.removed {
                self.item_removed(&join_index(path, i), &a[i]);
            }
            for j in alignment.added {
                self.item_added(&join_index(path, j), &b[j]);
            }
            return;
        }

        for index in 0..a.len().max(b.len()) {
            if self.stopped {
                return;
            }
            let child = join_index(path, index);
            match (a.get(index), b.get(index)) {
                (Some(x), Some(y)) => self.node(&child, x, y, depth + 1, true),
                (Some(x), None) => self.item_removed(&child, x),
                (None, Some(y)) => self.item_added(&child, y),
                (None, None) => {}
            }
        }
    }

    fn item_removed(&mut self, path: &str, value: &Value) {
        self.emit(Difference::new(path, DifferenceCategory::ItemRemoved, value.render(), None));
    }

    fn item_added(&mut self, path: &str, value: &Value) {
        self.emit(Difference::new(path, DifferenceCategory::ItemAdded, None, value.render()));
    }

    fn emit(&mut self, difference: Difference) {
        if self.stopped || self.rules.is_smart_ignored(&difference) {
            return;
        }
        if self.differences.len() >= self.engine.max_differences {
            self.truncated = true;
            self.stopped = true;
            return;
        }
        self.differences.push(difference);
    }

    fn abort_depth(&mut self, path: &str) {
        self.differences.push(
            Difference::new(path, DifferenceCategory::Other, None, None)
                .with_description(DEPTH_ABORT_MESSAGE),
        );
        self.truncated = true;
        self.stopped = true;
    }

    /// Deep equality under the active ignore, order and case rules
    fn equivalent(&self, path: &str, a: &Value, b: &Value) -> bool {
        if !path.is_empty() && self.rules.is_path_ignored(path) {
            return true;
        }
        match (a, b) {
            (Value::Object(_), Value::Object(_)) => zip_fields(a, b)
                .into_iter()
                .all(|(name, x, y)| self.equivalent(&join_field(path, name), x, y)),
            (Value::Collection(items_a), Value::Collection(items_b)) => {
                if items_a.len() != items_b.len() {
                    return false;
                }
                let element_path = format!("{}[*]", path);
                if self.rules.is_order_insensitive(path) {
                    align_unordered(items_a, items_b, |x, y| self.equivalent(&element_path, x, y))
                        .is_exact()
                } else {
                    items_a
                        .iter()
                        .zip(items_b)
                        .all(|(x, y)| self.equivalent(&element_path, x, y))
                }
            }
            (Value::Text(x), Value::Text(y)) if self.rules.is_case_insensitive(path) => {
                x == y || x.to_lowercase() == y.to_lowercase()
            }
            (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
                integer_equals_float(*x, *y)
            }
            _ => a == b,
        }
    }
}

/// Pairs fields by name: A's fields in order, then those only B has.
/// A missing side reads as null. On duplicate names the first one wins.
fn zip_fields<'v>(a: &'v Value, b: &'v Value) -> Vec<(&'v str, &'v Value, &'v Value)> {
    let no_fields: &[Field] = &[];
    let fields_a = match a {
        Value::Object(fields) => fields.as_slice(),
        _ => no_fields,
    };
    let fields_b = match b {
        Value::Object(fields) => fields.as_slice(),
        _ => no_fields,
    };

    let mut by_name_b: FxHashMap<&str, &Value> =
        FxHashMap::with_capacity_and_hasher(fields_b.len(), Default::default());
    for field in fields_b {
        by_name_b.entry(field.name.as_str()).or_insert(&field.value);
    }

    let mut seen: FxHashSet<&str> =
        FxHashSet::with_capacity_and_hasher(fields_a.len(), Default::default());
    let mut pairs = Vec::with_capacity(fields_a.len().max(fields_b.len()));
    for field in fields_a {
        if seen.insert(field.name.as_str()) {
            let other = by_name_b.get(field.name.as_str()).copied().unwrap_or(&NULL_VALUE);
            pairs.push((field.name.as_str(), &field.value, other));
        }
    }
    for field in fields_b {
        if seen.insert(field.name.as_str()) {
            pairs.push((field.name.as_str(), &NULL_VALUE, &field.value));
        }
    }
    pairs
}

/// Exact integer/float equality; no rounding above 2^53
fn integer_equals_float(integer: i64, float: f64) -> bool {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !float.is_finite() || float.fract() != 0.0 || float < -LIMIT || float >= LIMIT {
        return false;
    }
    float as i64 == integer && integer as f64 == float
}

fn categorize(a: &Value, b: &Value, in_collection: bool) -> DifferenceCategory {
    let (tag_a, tag_b) = (a.type_tag(), b.type_tag());
    if tag_a == TypeTag::Null || tag_b == TypeTag::Null {
        return DifferenceCategory::NullChanged;
    }
    if in_collection && !tag_a.is_container() && !tag_b.is_container() {
        return DifferenceCategory::CollectionItemChanged;
    }
    match (tag_a, tag_b) {
        (TypeTag::Text, TypeTag::Text) => DifferenceCategory::TextChanged,
        (x, y) if x.is_numeric() && y.is_numeric() => DifferenceCategory::NumericChanged,
        (TypeTag::DateTime, TypeTag::DateTime) => DifferenceCategory::DateTimeChanged,
        (TypeTag::Bool, TypeTag::Bool) => DifferenceCategory::BooleanChanged,
        _ => DifferenceCategory::Other,
    }
}
