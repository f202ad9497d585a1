//! Data models module
//!
//! Defines the records shared by every stage:
//! - Difference / ComparisonResult: output of the structural difference engine
//! - ExecutionOutcome / RawTextDifference: dual-endpoint classification and fallback
//! - FilePair / RequestPairUnit: units of work submitted in a batch
//! - UnitResult / BatchReport: one terminal record per unit, plus batch summary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::rules::Fingerprint;


/// Kind of change, derived from the runtime types of the two values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifferenceCategory {
    TextChanged,
    NumericChanged,
    DateTimeChanged,
    BooleanChanged,
    NullChanged,
    ItemAdded,
    ItemRemoved,
    CollectionItemChanged,
    Other,
}

impl fmt::Display for DifferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TextChanged => "text changed",
            Self::NumericChanged => "numeric changed",
            Self::DateTimeChanged => "date/time changed",
            Self::BooleanChanged => "boolean changed",
            Self::NullChanged => "null changed",
            Self::ItemAdded => "item added",
            Self::ItemRemoved => "item removed",
            Self::CollectionItemChanged => "collection item changed",
            Self::Other => "other",
        };
        write!(f, "{}", label)
    }
}

/// A single structural difference between two documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// Dotted property path with index markers, e.g. `Order.Items[2].Sku`
    pub property_path: String,
    pub category: DifferenceCategory,
    /// Rendered value on side A; `None` when null or missing
    pub value_a: Option<String>,
    /// Rendered value on side B; `None` when null or missing
    pub value_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Difference {
    pub fn new(
        property_path: impl Into<String>,
        category: DifferenceCategory,
        value_a: Option<String>,
        value_b: Option<String>,
    ) -> Self {
        Self {
            property_path: property_path.into(),
            category,
            value_a,
            value_b,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Last path segment with any index marker removed
    pub fn property_name(&self) -> &str {
        let last = self
            .property_path
            .rsplit('.')
            .next()
            .unwrap_or(&self.property_path);
        match last.find('[') {
            Some(pos) => &last[..pos],
            None => last,
        }
    }
}

/// Outcome of comparing one decoded pair; immutable once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub are_equal: bool,
    pub differences: Vec<Difference>,
    /// Set when the difference cap or depth limit stopped the walk early
    pub truncated: bool,
    /// Fingerprint of the rule set the result was computed under
    pub fingerprint: Fingerprint,
}

/// Terminal classification of a dual-endpoint call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    BothSuccess,
    StatusCodeMismatch,
    BothNonSuccess,
    OneOrBothFailed,
}

impl ExecutionOutcome {
    /// Whether the bodies may be decoded and compared structurally
    pub fn allows_structural(self) -> bool {
        self == ExecutionOutcome::BothSuccess
    }

    /// Whether the bodies go through the raw-text fallback
    pub fn uses_raw_text(self) -> bool {
        matches!(
            self,
            ExecutionOutcome::StatusCodeMismatch | ExecutionOutcome::BothNonSuccess
        )
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BothSuccess => "both success",
            Self::StatusCodeMismatch => "status code mismatch",
            Self::BothNonSuccess => "both non-success",
            Self::OneOrBothFailed => "one or both failed",
        };
        write!(f, "{}", label)
    }
}

/// Kind of line-level change reported by the raw-text fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawDifferenceType {
    Added,
    Removed,
    Modified,
    StatusCodeDifference,
}

/// Classification carried by a unit after dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeTag {
    pub outcome: ExecutionOutcome,
    pub status_a: Option<u16>,
    pub status_b: Option<u16>,
}

/// A line-level difference between two raw response bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTextDifference {
    #[serde(rename = "type")]
    pub kind: RawDifferenceType,
    /// 1-based line number on side A
    pub line_a: Option<usize>,
    /// 1-based line number on side B
    pub line_b: Option<usize>,
    pub text_a: Option<String>,
    pub text_b: Option<String>,
    pub description: String,
}

/// Result of the raw-text fallback for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTextComparison {
    pub differences: Vec<RawTextDifference>,
    /// Both endpoints answered with a non-success status, even if bodies match
    pub both_failing: bool,
    /// Side A body was cut at the byte ceiling
    pub truncated_a: bool,
    /// Side B body was cut at the byte ceiling
    pub truncated_b: bool,
}

/// Classified per-unit error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input bytes could not be decoded into a document
    Decode,
    /// Input could not be read (missing counterpart, I/O error)
    Read,
    /// Network failure or timeout on one or both endpoints
    Dispatch,
    /// A worker failed unexpectedly while handling the unit
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Decode => "decode",
            Self::Read => "read",
            Self::Dispatch => "dispatch",
            Self::Internal => "internal",
        };
        write!(f, "{}", label)
    }
}

/// Terminal error record for a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitError {
    pub kind: ErrorKind,
    pub message: String,
}

/// What a unit produced; exactly one per unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitPayload {
    Structural { result: Arc<ComparisonResult> },
    RawText { comparison: RawTextComparison },
    Error { error: UnitError },
}

/// Terminal record for one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    /// Unit identifier (relative path or request id)
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_a: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_b: Option<u16>,
    /// Result was served by the result cache
    #[serde(default)]
    pub from_cache: bool,
    pub payload: UnitPayload,
}

impl UnitResult {
    pub fn structural(id: impl Into<String>, result: Arc<ComparisonResult>, from_cache: bool) -> Self {
        Self {
            id: id.into(),
            outcome: None,
            status_a: None,
            status_b: None,
            from_cache,
            payload: UnitPayload::Structural { result },
        }
    }

    pub fn raw_text(id: impl Into<String>, comparison: RawTextComparison) -> Self {
        Self {
            id: id.into(),
            outcome: None,
            status_a: None,
            status_b: None,
            from_cache: false,
            payload: UnitPayload::RawText { comparison },
        }
    }

    pub fn error(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: None,
            status_a: None,
            status_b: None,
            from_cache: false,
            payload: UnitPayload::Error {
                error: UnitError {
                    kind,
                    message: message.into(),
                },
            },
        }
    }

    /// Attach dispatch classification data
    pub fn with_outcome(mut self, outcome: ExecutionOutcome, status_a: Option<u16>, status_b: Option<u16>) -> Self {
        self.outcome = Some(outcome);
        self.status_a = status_a;
        self.status_b = status_b;
        self
    }

    pub fn tagged(self, tag: Option<OutcomeTag>) -> Self {
        match tag {
            Some(tag) => self.with_outcome(tag.outcome, tag.status_a, tag.status_b),
            None => self,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, UnitPayload::Error { .. })
    }

    /// Equal means structurally equal, or identical bodies with healthy statuses
    pub fn is_equal(&self) -> bool {
        match &self.payload {
            UnitPayload::Structural { result } => result.are_equal,
            UnitPayload::RawText { comparison } => {
                comparison.differences.is_empty() && !comparison.both_failing
            }
            UnitPayload::Error { .. } => false,
        }
    }

    pub fn difference_count(&self) -> usize {
        match &self.payload {
            UnitPayload::Structural { result } => result.differences.len(),
            UnitPayload::RawText { comparison } => comparison.differences.len(),
            UnitPayload::Error { .. } => 0,
        }
    }
}

/// A pair of files compared in file mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    /// Relative path shared by both sides
    pub id: String,
    pub path_a: PathBuf,
    pub path_b: PathBuf,
}

/// A request replayed against both endpoints in request mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPairUnit {
    pub relative_id: String,
    pub body: Arc<[u8]>,
    pub headers_a: Vec<(String, String)>,
    pub headers_b: Vec<(String, String)>,
    pub content_type: String,
}

/// Summary statistics for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of terminal records
    pub total: usize,
    pub equal: usize,
    pub different: usize,
    pub errors: usize,
    pub from_cache: usize,
    pub both_success: usize,
    pub status_code_mismatch: usize,
    pub both_non_success: usize,
    pub one_or_both_failed: usize,
    /// Units never started because the batch was cancelled
    pub not_started: usize,
    /// Whether the batch was cancelled by the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

/// Complete output structure for JSON serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    /// RFC 3339 start timestamp
    pub started_at: String,
    pub duration_ms: u64,
    /// Per-unit records sorted by unit id
    pub results: Vec<UnitResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    /// Sort results by id and derive the summary
    pub fn new(
        batch_id: String,
        started_at: String,
        duration_ms: u64,
        mut results: Vec<UnitResult>,
        cancelled: bool,
        not_started: usize,
    ) -> Self {
        results.sort_by(|a, b| a.id.cmp(&b.id));

        let mut summary = BatchSummary {
            total: results.len(),
            not_started,
            cancelled: cancelled.then_some(true),
            ..BatchSummary::default()
        };

        for result in &results {
            if result.is_error() {
                summary.errors += 1;
            } else if result.is_equal() {
                summary.equal += 1;
            } else {
                summary.different += 1;
            }
            if result.from_cache {
                summary.from_cache += 1;
            }
            match result.outcome {
                Some(ExecutionOutcome::BothSuccess) => summary.both_success += 1,
                Some(ExecutionOutcome::StatusCodeMismatch) => summary.status_code_mismatch += 1,
                Some(ExecutionOutcome::BothNonSuccess) => summary.both_non_success += 1,
                Some(ExecutionOutcome::OneOrBothFailed) => summary.one_or_both_failed += 1,
                None => {}
            }
        }

        Self {
            batch_id,
            started_at,
            duration_ms,
            results,
            summary,
        }
    }

    /// True when every unit compared equal and nothing failed
    pub fn is_clean(&self) -> bool {
        self.summary.different == 0 && self.summary.errors == 0 && self.summary.cancelled.is_none()
    }
}
