//! Output formatting module
//!
//! Handles:
//! - Human-readable batch reports
//! - JSON output of the full `BatchReport`
//! - Writing to stdout or an output file
//! - Progress display (see `progress`)

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{BatchReport, UnitPayload, UnitResult};

pub mod progress;

/// Maximum differences listed per unit in human output
const MAX_LISTED_DIFFERENCES: usize = 20;

/// Render a report for terminal reading
pub fn render_human(report: &BatchReport) -> String {
    let mut out = String::new();
    let differing: Vec<&UnitResult> = report.results.iter().filter(|r| !r.is_equal()).collect();

    if differing.is_empty() && !report.results.is_empty() {
        let _ = writeln!(out, "All {} units are equal.\n", report.results.len());
    } else if report.results.is_empty() {
        let _ = writeln!(out, "No units were compared.\n");
    }

    for result in differing {
        render_unit(&mut out, result);
        out.push('\n');
    }

    let summary = &report.summary;
    let _ = writeln!(out, "Batch Summary:");
    let _ = writeln!(out, "  Batch: {}", report.batch_id);
    let _ = writeln!(out, "  Units: {}", summary.total);
    let _ = writeln!(out, "  Equal: {}", summary.equal);
    let _ = writeln!(out, "  Different: {}", summary.different);
    if summary.errors > 0 {
        let _ = writeln!(out, "  Errors: {}", summary.errors);
    }
    if summary.from_cache > 0 {
        let _ = writeln!(out, "  From cache: {}", summary.from_cache);
    }
    let outcomes = summary.both_success
        + summary.status_code_mismatch
        + summary.both_non_success
        + summary.one_or_both_failed;
    if outcomes > 0 {
        let _ = writeln!(
            out,
            "  Outcomes: {} both success, {} status mismatch, {} both non-success, {} failed",
            summary.both_success, summary.status_code_mismatch, summary.both_non_success, summary.one_or_both_failed
        );
    }

    let duration_sec = report.duration_ms as f64 / 1000.0;
    if duration_sec < 1.0 {
        let _ = writeln!(out, "  Duration: {}ms", report.duration_ms);
    } else {
        let _ = writeln!(out, "  Duration: {:.2}s", duration_sec);
    }

    if summary.cancelled == Some(true) {
        let _ = writeln!(out, "  Status: Interrupted by user ({} units not started)", summary.not_started);
    }
    out
}

fn render_unit(out: &mut String, result: &UnitResult) {
    let outcome = result
        .outcome
        .map(|o| format!(" [{}]", o))
        .unwrap_or_default();
    let _ = writeln!(out, "{}{}:", result.id, outcome);

    match &result.payload {
        UnitPayload::Structural { result: comparison } => {
            for difference in comparison.differences.iter().take(MAX_LISTED_DIFFERENCES) {
                let _ = writeln!(
                    out,
                    "  {} ({}): {} -> {}",
                    difference.property_path,
                    difference.category,
                    difference.value_a.as_deref().unwrap_or("null"),
                    difference.value_b.as_deref().unwrap_or("null"),
                );
            }
            let hidden = comparison.differences.len().saturating_sub(MAX_LISTED_DIFFERENCES);
            if hidden > 0 {
                let _ = writeln!(out, "  ... {} more", hidden);
            }
            if comparison.truncated {
                let _ = writeln!(out, "  (truncated)");
            }
        }
        UnitPayload::RawText { comparison } => {
            if comparison.both_failing {
                let _ = writeln!(out, "  both endpoints failing");
            }
            for difference in comparison.differences.iter().take(MAX_LISTED_DIFFERENCES) {
                let _ = writeln!(out, "  {:?}: {}", difference.kind, difference.description);
            }
            let hidden = comparison.differences.len().saturating_sub(MAX_LISTED_DIFFERENCES);
            if hidden > 0 {
                let _ = writeln!(out, "  ... {} more", hidden);
            }
        }
        UnitPayload::Error { error } => {
            let _ = writeln!(out, "  error ({}): {}", error.kind, error.message);
        }
    }
}

pub fn render_json(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

/// Print the report to stdout, or write it to `output` when given
pub fn write_report(report: &BatchReport, json: bool, output: Option<&Path>) -> Result<()> {
    let rendered = if json {
        render_json(report)?
    } else {
        render_human(report)
    };

    match output {
        Some(path) => std::fs::write(path, rendered.as_bytes())
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            print!("{}", rendered);
            if json {
                println!();
            }
            Ok(())
        }
    }
}
