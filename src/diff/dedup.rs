//! Duplicate difference collapsing
//!
//! Two differences collapse when their paths normalize to the same logical
//! property (backing-field aliases resolved, index markers removed) and they
//! carry the same category and values. Added/removed items are per-item facts
//! and are never collapsed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Difference, DifferenceCategory};
use crate::rules::{index_segment_count, normalize_path};

/// Which path survives when duplicates collapse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Shortest path wins; fewer index markers breaks ties
    #[default]
    ShortestPath,
    /// Fewest index markers wins; shorter path breaks ties
    FewestIndexSegments,
}

impl DedupPolicy {
    fn rank(self, path: &str) -> (usize, usize) {
        let length = path.len();
        let indices = index_segment_count(path);
        match self {
            DedupPolicy::ShortestPath => (length, indices),
            DedupPolicy::FewestIndexSegments => (indices, length),
        }
    }

    /// Whether `candidate` should replace `current` as the surfaced path
    fn prefers(self, candidate: &str, current: &str) -> bool {
        (self.rank(candidate), candidate) < (self.rank(current), current)
    }
}

type GroupKey = (String, DifferenceCategory, Option<String>, Option<String>);

/// Collapse duplicates, keeping the first occurrence's position
pub fn deduplicate(differences: Vec<Difference>, policy: DedupPolicy) -> Vec<Difference> {
    let mut out: Vec<Difference> = Vec::with_capacity(differences.len());
    let mut groups: HashMap<GroupKey, usize> = HashMap::new();

    for difference in differences {
        if matches!(
            difference.category,
            DifferenceCategory::ItemAdded | DifferenceCategory::ItemRemoved
        ) {
            out.push(difference);
            continue;
        }

        let key = (
            normalize_path(&difference.property_path),
            difference.category,
            difference.value_a.clone(),
            difference.value_b.clone(),
        );
        match groups.get(&key) {
            Some(&slot) => {
                if policy.prefers(&difference.property_path, &out[slot].property_path) {
                    out[slot] = difference;
                }
            }
            None => {
                groups.insert(key, out.len());
                out.push(difference);
            }
        }
    }

    out
}
