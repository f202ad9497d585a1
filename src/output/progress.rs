//! Progress reporting for batch runs
//!
//! The pipeline and dispatcher report through `ProgressReporter`, which
//! throttles an injected `OnProgress(completed, total, phase)` callback to at
//! most one call per interval. The final call of a phase (completed == total)
//! is always delivered. `ConsoleProgress` is the stderr renderer used by the
//! binary.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::constants::PROGRESS_MIN_INTERVAL;

/// Injectable progress callback: (completed, total, phase)
pub type OnProgress = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Rate-limited front for an `OnProgress` callback
pub struct ProgressReporter {
    callback: Option<OnProgress>,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(callback: OnProgress) -> Self {
        Self {
            callback: Some(callback),
            min_interval: PROGRESS_MIN_INTERVAL,
            last_emit: Mutex::new(None),
        }
    }

    /// Reporter that drops every update
    pub fn disabled() -> Self {
        Self {
            callback: None,
            min_interval: PROGRESS_MIN_INTERVAL,
            last_emit: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Forward an update if the interval has elapsed or the phase is done
    pub fn report(&self, completed: usize, total: usize, phase: &str) {
        let Some(callback) = &self.callback else {
            return;
        };

        let now = Instant::now();
        let due = match self.last_emit.lock() {
            Ok(mut last) => {
                let finished = completed >= total;
                let elapsed = last.map_or(true, |at| now.duration_since(at) >= self.min_interval);
                if finished || elapsed {
                    *last = Some(now);
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };

        if due {
            callback(completed, total, phase);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Renders progress on stderr, one rewritten line per phase
pub struct ConsoleProgress {
    quiet_mode: bool,
}

impl ConsoleProgress {
    pub fn new(quiet_mode: bool) -> Self {
        Self { quiet_mode }
    }

    /// Render a single update
    pub fn render(&self, completed: usize, total: usize, phase: &str) {
        if self.quiet_mode {
            return;
        }

        let percent = if total == 0 {
            100
        } else {
            completed * 100 / total
        };
        if completed >= total {
            eprintln!("\r✓ {}: {}/{} units ({}%) - completed", phase, completed, total, percent);
        } else {
            eprint!("\r{}: {}/{} units ({}%)", phase, completed, total, percent);
        }
        io::stderr().flush().unwrap_or(());
    }

    /// Wrap the renderer as an `OnProgress` callback
    pub fn into_callback(self) -> OnProgress {
        Arc::new(move |completed, total, phase: &str| self.render(completed, total, phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (OnProgress, Arc<Mutex<Vec<(usize, usize, String)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback: OnProgress = Arc::new(move |completed, total, phase: &str| {
            sink.lock().unwrap().push((completed, total, phase.to_string()));
        });
        (callback, calls)
    }

    #[test]
    fn test_updates_are_throttled() {
        let (callback, calls) = recording();
        let reporter = ProgressReporter::new(callback).with_interval(Duration::from_secs(60));
        for completed in 1..100 {
            reporter.report(completed, 100, "compare");
        }
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_final_update_always_delivered() {
        let (callback, calls) = recording();
        let reporter = ProgressReporter::new(callback).with_interval(Duration::from_secs(60));
        reporter.report(1, 3, "dispatch");
        reporter.report(2, 3, "dispatch");
        reporter.report(3, 3, "dispatch");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (3, 3, "dispatch".to_string()));
    }

    #[test]
    fn test_zero_interval_delivers_everything() {
        let (callback, calls) = recording();
        let reporter = ProgressReporter::new(callback).with_interval(Duration::ZERO);
        for completed in 1..=5 {
            reporter.report(completed, 5, "compare");
        }
        assert_eq!(calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_disabled_reporter_is_silent() {
        ProgressReporter::disabled().report(1, 1, "compare");
    }

    #[test]
    fn test_console_progress_quiet() {
        let callback = ConsoleProgress::new(true).into_callback();
        callback(1, 2, "compare");
        callback(2, 2, "compare");
    }
}
