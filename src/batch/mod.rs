//! Batch orchestration
//!
//! `ComparisonService` owns the pipeline, the raw-text fallback and the
//! active rule set, and turns a submitted batch into a `BatchReport` with one
//! terminal record per unit:
//!
//! - File mode: every discovered pair goes through the pipeline; names found
//!   on one side only become `Read` errors.
//! - Request mode: units are dispatched to both endpoints, classified, then
//!   routed to the pipeline (`BothSuccess`), the raw-text fallback
//!   (`StatusCodeMismatch`, `BothNonSuccess`) or an error record
//!   (`OneOrBothFailed`).

use log::{debug, error};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::CacheStats;
use crate::constants::{DEFAULT_MODEL_NAME, PHASE_FALLBACK};
use crate::dispatch::{Dispatcher, EndpointClient, RawTextComparator};
use crate::logging::EventLogger;
use crate::models::{BatchReport, ErrorKind, OutcomeTag, RequestPairUnit, UnitPayload, UnitResult};
use crate::output::progress::ProgressReporter;
use crate::pipeline::{PairJob, Pipeline};
use crate::rules::{RuleError, RuleSet, RuleSetBuilder};
use crate::scan::FileDiscovery;

const MODE_FILES: &str = "files";
const MODE_REQUESTS: &str = "requests";

/// Snapshot of both caches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub results: CacheStats,
    pub documents: CacheStats,
}

/// A response pair that must be compared as raw text
struct FallbackJob {
    id: String,
    tag: OutcomeTag,
    body_a: Arc<[u8]>,
    body_b: Arc<[u8]>,
    status_a: u16,
    status_b: u16,
}

/// Long-lived entry point shared by every batch of a session
pub struct ComparisonService {
    pipeline: Pipeline,
    raw_text: RawTextComparator,
    model: String,
    rules: RwLock<Arc<RuleSet>>,
    events: EventLogger,
}

impl ComparisonService {
    pub fn new(pipeline: Pipeline, rules: RuleSet) -> Self {
        Self {
            pipeline,
            raw_text: RawTextComparator::default(),
            model: DEFAULT_MODEL_NAME.to_string(),
            rules: RwLock::new(Arc::new(rules)),
            events: EventLogger::default(),
        }
    }

    pub fn with_raw_text(mut self, raw_text: RawTextComparator) -> Self {
        self.raw_text = raw_text;
        self
    }

    /// Model name handed to the decoder
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Rule set new batches run under
    pub fn active_rules(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(rules) => Arc::clone(&rules),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new rule set and drop results computed under any other
    ///
    /// Returns the number of cache entries invalidated. Batches already
    /// running keep the rule set they started with.
    pub fn replace_rules(&self, rules: RuleSet) -> usize {
        let rules = Arc::new(rules);
        let previous = {
            let mut slot = match self.rules.write() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *slot, Arc::clone(&rules))
        };

        if previous.fingerprint() == rules.fingerprint() {
            return 0;
        }
        let invalidated = self.pipeline.result_cache().invalidate(rules.fingerprint());
        self.events
            .rules_replaced(previous.fingerprint(), rules.fingerprint(), invalidated);
        invalidated
    }

    /// Derive a new rule set from the active one and make it active
    pub fn update_rules<F>(&self, edit: F) -> Result<usize, RuleError>
    where
        F: FnOnce(RuleSetBuilder) -> RuleSetBuilder,
    {
        let rules = edit(self.active_rules().to_builder()).build()?;
        Ok(self.replace_rules(rules))
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            results: self.pipeline.result_cache().stats(),
            documents: self.pipeline.document_cache().stats(),
        }
    }

    /// Compare every discovered file pair
    pub async fn run_file_batch(
        &self,
        discovery: FileDiscovery,
        cancel: Arc<AtomicBool>,
        progress: &ProgressReporter,
    ) -> BatchReport {
        let started = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();
        let batch_id = uuid::Uuid::new_v4().to_string();
        let rules = self.active_rules();

        let FileDiscovery { pairs, orphans } = discovery;
        self.events
            .batch_started(&batch_id, MODE_FILES, pairs.len() + orphans.len(), rules.fingerprint());

        let mut results: Vec<UnitResult> = orphans
            .into_iter()
            .map(|orphan| {
                let result = orphan.into_result();
                if let Some(message) = error_message(&result) {
                    self.events.unit_failed(&result.id, ErrorKind::Read, message);
                }
                result
            })
            .collect();

        let jobs = pairs
            .into_iter()
            .map(|pair| PairJob::from_files(pair, self.model.as_str()))
            .collect();
        let output = self.pipeline.run(jobs, rules, Arc::clone(&cancel), progress).await;
        results.extend(output.results);

        self.finish(batch_id, started_at, started, results, &cancel, output.not_started)
    }

    /// Dispatch every unit to both endpoints and compare the responses
    pub async fn run_request_batch<C: EndpointClient + 'static>(
        &self,
        units: Vec<RequestPairUnit>,
        dispatcher: &Dispatcher<C>,
        cancel: Arc<AtomicBool>,
        progress: &ProgressReporter,
    ) -> BatchReport {
        let started = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();
        let batch_id = uuid::Uuid::new_v4().to_string();
        let rules = self.active_rules();
        self.events
            .batch_started(&batch_id, MODE_REQUESTS, units.len(), rules.fingerprint());

        let dispatched = dispatcher.dispatch_all(units, Arc::clone(&cancel), progress).await;
        let mut not_started = dispatched.not_started;

        let mut results = Vec::new();
        let mut jobs = Vec::new();
        let mut fallback = Vec::new();
        for pair in dispatched.pairs {
            let tag = pair.tag();
            let message = pair.failure_message();
            debug!("{}: {}", pair.id, pair.outcome);
            match (pair.outcome, pair.side_a, pair.side_b) {
                (outcome, Ok(a), Ok(b)) if outcome.allows_structural() => {
                    jobs.push(PairJob::from_bodies(pair.id, self.model.as_str(), a.body, b.body, Some(tag)));
                }
                (outcome, Ok(a), Ok(b)) if outcome.uses_raw_text() => fallback.push(FallbackJob {
                    id: pair.id,
                    tag,
                    body_a: a.body,
                    body_b: b.body,
                    status_a: a.status,
                    status_b: b.status,
                }),
                _ => {
                    self.events.unit_failed(&pair.id, ErrorKind::Dispatch, &message);
                    results.push(UnitResult::error(pair.id, ErrorKind::Dispatch, message).tagged(Some(tag)));
                }
            }
        }

        let output = self.pipeline.run(jobs, rules, Arc::clone(&cancel), progress).await;
        not_started += output.not_started;
        results.extend(output.results);

        let (fallback_results, skipped) = self.run_fallback(fallback, &cancel, progress).await;
        not_started += skipped;
        results.extend(fallback_results);

        self.finish(batch_id, started_at, started, results, &cancel, not_started)
    }

    /// Line-diff the raw-text subset on the blocking pool
    async fn run_fallback(
        &self,
        jobs: Vec<FallbackJob>,
        cancel: &Arc<AtomicBool>,
        progress: &ProgressReporter,
    ) -> (Vec<UnitResult>, usize) {
        let total = jobs.len();
        if total == 0 {
            return (Vec::new(), 0);
        }

        let slots = Arc::new(Semaphore::new(
            self.pipeline.settings().compare_workers.ceiling.max(1),
        ));
        let mut admitted: Vec<(String, OutcomeTag)> = Vec::with_capacity(total);
        let mut tasks = JoinSet::new();
        let mut not_started = 0;

        for (index, job) in jobs.into_iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                not_started = total - index;
                break;
            }
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                not_started = total - index;
                break;
            };
            admitted.push((job.id.clone(), job.tag));
            let comparator = self.raw_text;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let comparison = comparator.compare(
                    &job.body_a,
                    &job.body_b,
                    job.status_a,
                    job.status_b,
                    job.tag.outcome,
                );
                UnitResult::raw_text(job.id, comparison).tagged(Some(job.tag))
            });
        }

        let expected = admitted.len();
        let mut results = Vec::with_capacity(expected);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    results.push(result);
                    progress.report(results.len(), expected, PHASE_FALLBACK);
                }
                Err(e) => error!("raw-text comparison failed: {}", e),
            }
        }

        if results.len() < expected {
            let seen: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
            for (id, tag) in admitted {
                if !seen.contains(&id) {
                    results.push(
                        UnitResult::error(id, ErrorKind::Internal, "raw-text comparison task failed")
                            .tagged(Some(tag)),
                    );
                }
            }
        }

        (results, not_started)
    }

    fn finish(
        &self,
        batch_id: String,
        started_at: String,
        started: Instant,
        results: Vec<UnitResult>,
        cancel: &AtomicBool,
        not_started: usize,
    ) -> BatchReport {
        let cancelled = cancel.load(Ordering::SeqCst);
        let duration_ms = started.elapsed().as_millis() as u64;
        if cancelled {
            self.events.batch_aborted(&batch_id, "cancelled by caller");
        }
        let report = BatchReport::new(batch_id, started_at, duration_ms, results, cancelled, not_started);
        self.events
            .batch_completed(&report.batch_id, &report.summary, report.duration_ms);
        report
    }
}

fn error_message(result: &UnitResult) -> Option<&str> {
    match &result.payload {
        UnitPayload::Error { error } => Some(&error.message),
        _ => None,
    }
}
