//! Raw-text fallback comparator
//!
//! Used when a response pair must not be decoded (non-success status on at
//! least one side). Bodies are cut to a byte ceiling on a character
//! boundary, split into lines and aligned with a longest-common-subsequence
//! table. Adjacent removals and additions pair up as modifications.

use std::borrow::Cow;

use crate::constants::DEFAULT_MAX_RAW_BODY_BYTES;
use crate::models::{ExecutionOutcome, RawDifferenceType, RawTextComparison, RawTextDifference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOp {
    Same,
    Removed(usize),
    Added(usize),
}

/// Line-level comparator for raw response bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTextComparator {
    max_body_bytes: usize,
}

impl Default for RawTextComparator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RAW_BODY_BYTES)
    }
}

impl RawTextComparator {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            max_body_bytes: max_body_bytes.max(1),
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Compare two captured bodies
    pub fn compare(
        &self,
        body_a: &[u8],
        body_b: &[u8],
        status_a: u16,
        status_b: u16,
        outcome: ExecutionOutcome,
    ) -> RawTextComparison {
        let (text_a, truncated_a) = truncate_body(body_a, self.max_body_bytes);
        let (text_b, truncated_b) = truncate_body(body_b, self.max_body_bytes);
        let lines_a: Vec<&str> = text_a.lines().collect();
        let lines_b: Vec<&str> = text_b.lines().collect();

        let mut differences = Vec::new();
        if status_a != status_b {
            differences.push(RawTextDifference {
                kind: RawDifferenceType::StatusCodeDifference,
                line_a: None,
                line_b: None,
                text_a: Some(status_a.to_string()),
                text_b: Some(status_b.to_string()),
                description: format!("status code {} vs {}", status_a, status_b),
            });
        }
        differences.extend(line_differences(&lines_a, &lines_b));

        RawTextComparison {
            differences,
            both_failing: outcome == ExecutionOutcome::BothNonSuccess,
            truncated_a,
            truncated_b,
        }
    }
}

/// Lossy UTF-8 view of at most `max` input bytes, cut on a character boundary
///
/// The cut is made on the raw bytes so replacement characters for invalid
/// input do not eat into the budget.
fn truncate_body(body: &[u8], max: usize) -> (Cow<'_, str>, bool) {
    if body.len() <= max {
        return (String::from_utf8_lossy(body), false);
    }
    let head = &body[..max];
    let end = match std::str::from_utf8(head) {
        Ok(_) => max,
        // Only a sequence split by the cut is incomplete
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => without_split_tail(head),
    };
    (String::from_utf8_lossy(&body[..end]), true)
}

/// Length of `bytes` minus a trailing multi-byte sequence the cut left incomplete
fn without_split_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

fn line_differences(a: &[&str], b: &[&str]) -> Vec<RawTextDifference> {
    let mut differences = Vec::new();
    let mut removed: Vec<usize> = Vec::new();
    let mut added: Vec<usize> = Vec::new();

    for op in align_lines(a, b) {
        match op {
            LineOp::Removed(i) => removed.push(i),
            LineOp::Added(j) => added.push(j),
            LineOp::Same => flush_block(a, b, &mut removed, &mut added, &mut differences),
        }
    }
    flush_block(a, b, &mut removed, &mut added, &mut differences);
    differences
}

/// Emit one block of changes between two runs of equal lines
fn flush_block(
    a: &[&str],
    b: &[&str],
    removed: &mut Vec<usize>,
    added: &mut Vec<usize>,
    out: &mut Vec<RawTextDifference>,
) {
    let paired = removed.len().min(added.len());
    for (&i, &j) in removed.iter().zip(added.iter()) {
        out.push(RawTextDifference {
            kind: RawDifferenceType::Modified,
            line_a: Some(i + 1),
            line_b: Some(j + 1),
            text_a: Some(a[i].to_string()),
            text_b: Some(b[j].to_string()),
            description: format!("line {} changed", i + 1),
        });
    }
    for &i in &removed[paired..] {
        out.push(RawTextDifference {
            kind: RawDifferenceType::Removed,
            line_a: Some(i + 1),
            line_b: None,
            text_a: Some(a[i].to_string()),
            text_b: None,
            description: format!("line {} removed", i + 1),
        });
    }
    for &j in &added[paired..] {
        out.push(RawTextDifference {
            kind: RawDifferenceType::Added,
            line_a: None,
            line_b: Some(j + 1),
            text_a: None,
            text_b: Some(b[j].to_string()),
            description: format!("line {} added", j + 1),
        });
    }
    removed.clear();
    added.clear();
}

/// LCS alignment; common prefix and suffix are trimmed before the table
fn align_lines(a: &[&str], b: &[&str]) -> Vec<LineOp> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];
    let (n, m) = (mid_a.len(), mid_b.len());

    // table[i][j] = LCS length of mid_a[i..] and mid_b[j..]
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if mid_a[i] == mid_b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = vec![LineOp::Same; prefix];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if mid_a[i] == mid_b[j] {
            ops.push(LineOp::Same);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(LineOp::Removed(prefix + i));
            i += 1;
        } else {
            ops.push(LineOp::Added(prefix + j));
            j += 1;
        }
    }
    ops.extend((i..n).map(|k| LineOp::Removed(prefix + k)));
    ops.extend((j..m).map(|k| LineOp::Added(prefix + k)));
    ops.extend(std::iter::repeat(LineOp::Same).take(suffix));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(comparison: &RawTextComparison) -> Vec<RawDifferenceType> {
        comparison.differences.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_status_mismatch_prepends_status_difference() {
        let comparison = RawTextComparator::default().compare(
            b"{\"ok\":true}\nline two",
            b"Internal Server Error\nline two",
            200,
            500,
            ExecutionOutcome::StatusCodeMismatch,
        );

        assert_eq!(
            kinds(&comparison),
            vec![RawDifferenceType::StatusCodeDifference, RawDifferenceType::Modified]
        );
        let status = &comparison.differences[0];
        assert_eq!(status.text_a.as_deref(), Some("200"));
        assert_eq!(status.text_b.as_deref(), Some("500"));
        assert_eq!(comparison.differences[1].line_a, Some(1));
        assert!(!comparison.both_failing);
    }

    #[test]
    fn test_identical_failing_bodies_are_flagged() {
        let comparison = RawTextComparator::default().compare(
            b"Service Unavailable",
            b"Service Unavailable",
            503,
            503,
            ExecutionOutcome::BothNonSuccess,
        );
        assert!(comparison.differences.is_empty());
        assert!(comparison.both_failing);
    }

    #[test]
    fn test_added_and_removed_lines() {
        let comparison = RawTextComparator::default().compare(
            b"a\nb\nc",
            b"a\nc\nd",
            404,
            404,
            ExecutionOutcome::BothNonSuccess,
        );
        assert_eq!(
            kinds(&comparison),
            vec![RawDifferenceType::Removed, RawDifferenceType::Added]
        );
        assert_eq!(comparison.differences[0].line_a, Some(2));
        assert_eq!(comparison.differences[1].line_b, Some(3));
    }

    #[test]
    fn test_changed_block_pairs_as_modified() {
        let comparison = RawTextComparator::default().compare(
            b"head\nx1\nx2\ntail",
            b"head\ny1\ny2\ny3\ntail",
            500,
            500,
            ExecutionOutcome::BothNonSuccess,
        );
        assert_eq!(
            kinds(&comparison),
            vec![
                RawDifferenceType::Modified,
                RawDifferenceType::Modified,
                RawDifferenceType::Added
            ]
        );
        assert_eq!(comparison.differences[2].line_b, Some(4));
    }

    #[test]
    fn test_bodies_are_truncated_on_char_boundary() {
        let body_a = "é".repeat(10);
        let (text, truncated) = truncate_body(body_a.as_bytes(), 5);
        assert!(truncated);
        assert_eq!(text, "éé");

        let comparison = RawTextComparator::new(4).compare(
            b"same-prefix-then-different",
            b"same-prefix-and-more",
            500,
            502,
            ExecutionOutcome::BothNonSuccess,
        );
        assert!(comparison.truncated_a);
        assert!(comparison.truncated_b);
        assert_eq!(kinds(&comparison), vec![RawDifferenceType::StatusCodeDifference]);
    }

    #[test]
    fn test_invalid_bytes_do_not_shrink_the_budget() {
        let mut body = vec![0xFF];
        body.extend_from_slice(b"abcdefghijklmnop");
        let (text, truncated) = truncate_body(&body, 10);
        assert!(truncated);
        assert_eq!(text, "\u{FFFD}abcdefghi");

        let mut split = vec![0xFF, b'a'];
        split.extend_from_slice("é".as_bytes());
        let (text, _) = truncate_body(&split, 3);
        assert_eq!(text, "\u{FFFD}a");
    }

    #[test]
    fn test_empty_bodies() {
        let comparison =
            RawTextComparator::default().compare(b"", b"error", 500, 500, ExecutionOutcome::BothNonSuccess);
        assert_eq!(kinds(&comparison), vec![RawDifferenceType::Added]);
    }
}
