//! Logging setup and structured batch events
//!
//! Everything logs through the `log` facade; the binary installs `env_logger`
//! as the backend. Batch lifecycle events go through `EventLogger`, which
//! writes one `"<message> | <json>"` line per event so they stay greppable
//! and machine-parseable in the same stream.

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn, LevelFilter};
use serde_json::json;

use crate::constants::APP_LOG_TARGET;
use crate::models::{BatchSummary, ErrorKind};
use crate::pipeline::PressureReading;
use crate::rules::Fingerprint;

/// Install env_logger at the given level; `RUST_LOG` refines it
pub fn init_logging(level: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder
        .try_init()
        .map_err(|e| anyhow!("Failed to set logger: {}", e))
}

/// Map the CLI verbosity flags onto a level filter
pub fn level_for(quiet: bool, verbose: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, true) => LevelFilter::Debug,
        (false, false) => LevelFilter::Warn,
    }
}

/// Levels of structured events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Structured logger for batch lifecycle events
#[derive(Debug, Clone)]
pub struct EventLogger {
    level: LogLevel,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl EventLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn batch_started(&self, batch_id: &str, mode: &str, units: usize, fingerprint: &Fingerprint) {
        let data = json!({
            "event": "batch_started",
            "batch_id": batch_id,
            "mode": mode,
            "units": units,
            "fingerprint": fingerprint.as_str(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, &format!("Batch {} started", batch_id), &data);
    }

    pub fn batch_completed(&self, batch_id: &str, summary: &BatchSummary, duration_ms: u64) {
        let data = json!({
            "event": "batch_completed",
            "batch_id": batch_id,
            "duration_ms": duration_ms,
            "summary": summary,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let level = if summary.cancelled.is_some() {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        self.log_structured(level, &format!("Batch {} completed", batch_id), &data);
    }

    pub fn unit_failed(&self, unit_id: &str, kind: ErrorKind, message: &str) {
        let data = json!({
            "event": "unit_failed",
            "unit": unit_id,
            "kind": kind,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Warn, &format!("Unit {} failed ({})", unit_id, kind), &data);
    }

    pub fn concurrency_adjusted(&self, stage: &str, from: usize, to: usize, reading: &PressureReading) {
        let data = json!({
            "event": "concurrency_adjusted",
            "stage": stage,
            "from": from,
            "to": to,
            "cpu_percent": reading.cpu_percent,
            "available_memory": reading.available_memory,
            "total_memory": reading.total_memory,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Debug, &format!("{} workers {} -> {}", stage, from, to), &data);
    }

    pub fn rules_replaced(&self, previous: &Fingerprint, active: &Fingerprint, invalidated: usize) {
        let data = json!({
            "event": "rules_replaced",
            "previous": previous.as_str(),
            "active": active.as_str(),
            "invalidated": invalidated,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, "Rule set replaced", &data);
    }

    pub fn batch_aborted(&self, batch_id: &str, reason: &str) {
        let data = json!({
            "event": "batch_aborted",
            "batch_id": batch_id,
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Error, &format!("Batch {} aborted", batch_id), &data);
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) {
        if level > self.level {
            return;
        }

        let full_message = format!("{} | {}", message, data);
        match level {
            LogLevel::Error => error!(target: APP_LOG_TARGET, "{}", full_message),
            LogLevel::Warn => warn!(target: APP_LOG_TARGET, "{}", full_message),
            LogLevel::Info => info!(target: APP_LOG_TARGET, "{}", full_message),
            LogLevel::Debug => debug!(target: APP_LOG_TARGET, "{}", full_message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_flags() {
        assert_eq!(level_for(true, true), LevelFilter::Error);
        assert_eq!(level_for(false, true), LevelFilter::Debug);
        assert_eq!(level_for(false, false), LevelFilter::Warn);
    }

    #[test]
    fn test_level_ordering_filters_events() {
        assert!(LogLevel::Debug > LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Warn);
    }

    #[test]
    fn test_events_do_not_panic_without_backend() {
        let logger = EventLogger::new(LogLevel::Debug);
        let fingerprint = Fingerprint::from_hex("00ff");
        logger.batch_started("b1", "files", 3, &fingerprint);
        logger.unit_failed("a.json", ErrorKind::Decode, "malformed input");
        logger.batch_completed("b1", &BatchSummary::default(), 12);
        logger.rules_replaced(&fingerprint, &fingerprint, 0);
    }
}
