//! Collection alignment
//!
//! Positional comparison needs no alignment. Order-insensitive comparison
//! pairs items in three passes:
//! 1. items on both sides that are equivalent under the active rules
//! 2. remaining items, paired in their original relative order
//! 3. anything left over is reported as added or removed

use crate::document::Value;

/// How the items of two collections line up
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Alignment {
    /// Equivalent items, never reported
    pub matched: Vec<(usize, usize)>,
    /// Non-equivalent items compared field by field
    pub paired: Vec<(usize, usize)>,
    /// Indices on side A with no counterpart
    pub removed: Vec<usize>,
    /// Indices on side B with no counterpart
    pub added: Vec<usize>,
}

impl Alignment {
    /// Every item found an equivalent counterpart
    pub fn is_exact(&self) -> bool {
        self.paired.is_empty() && self.removed.is_empty() && self.added.is_empty()
    }
}

/// Best-effort value-equality matching for order-insensitive collections
pub fn align_unordered<F>(a: &[Value], b: &[Value], equivalent: F) -> Alignment
where
    F: Fn(&Value, &Value) -> bool,
{
    let mut used_b = vec![false; b.len()];
    let mut unmatched_a = Vec::new();
    let mut alignment = Alignment::default();

    for (i, item_a) in a.iter().enumerate() {
        let found = b
            .iter()
            .enumerate()
            .find(|(j, item_b)| !used_b[*j] && equivalent(item_a, item_b))
            .map(|(j, _)| j);
        match found {
            Some(j) => {
                used_b[j] = true;
                alignment.matched.push((i, j));
            }
            None => unmatched_a.push(i),
        }
    }

    let mut unmatched_b = used_b
        .iter()
        .enumerate()
        .filter(|(_, used)| !**used)
        .map(|(j, _)| j);

    for i in unmatched_a {
        match unmatched_b.next() {
            Some(j) => alignment.paired.push((i, j)),
            None => alignment.removed.push(i),
        }
    }
    alignment.added.extend(unmatched_b);

    alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::Text(s.to_string())).collect()
    }

    #[test]
    fn test_permutation_is_exact() {
        let a = texts(&["A", "B", "C"]);
        let b = texts(&["C", "A", "B"]);
        let alignment = align_unordered(&a, &b, |x, y| x == y);
        assert!(alignment.is_exact());
        assert_eq!(alignment.matched, vec![(0, 1), (1, 2), (2, 0)]);
    }

    #[test]
    fn test_leftovers_pair_in_order() {
        let a = texts(&["A", "X", "Y"]);
        let b = texts(&["Z", "A"]);
        let alignment = align_unordered(&a, &b, |x, y| x == y);
        assert_eq!(alignment.matched, vec![(0, 1)]);
        assert_eq!(alignment.paired, vec![(1, 0)]);
        assert_eq!(alignment.removed, vec![2]);
        assert!(alignment.added.is_empty());
    }

    #[test]
    fn test_duplicates_are_matched_once() {
        let a = texts(&["A", "A"]);
        let b = texts(&["A", "B", "C"]);
        let alignment = align_unordered(&a, &b, |x, y| x == y);
        assert_eq!(alignment.matched, vec![(0, 0)]);
        assert_eq!(alignment.paired, vec![(1, 1)]);
        assert_eq!(alignment.added, vec![2]);
    }
}
