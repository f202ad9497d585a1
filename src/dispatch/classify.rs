//! Outcome classification for dual-endpoint calls

use crate::models::ExecutionOutcome;

/// HTTP status in [200, 300)
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Map (both calls completed, status A, status B) to an outcome
///
/// Statuses are ignored when either call failed outright.
pub fn classify(success: bool, status_a: u16, status_b: u16) -> ExecutionOutcome {
    if !success {
        return ExecutionOutcome::OneOrBothFailed;
    }
    match (is_success_status(status_a), is_success_status(status_b)) {
        (true, true) => ExecutionOutcome::BothSuccess,
        (true, false) | (false, true) => ExecutionOutcome::StatusCodeMismatch,
        (false, false) => ExecutionOutcome::BothNonSuccess,
    }
}
