//! Comparison pipeline
//!
//! Two bounded producer/consumer stages over a batch of pairs:
//!
//! ```text
//! feeder ─▶ [jobs] ─▶ decode workers ─▶ [decoded] ─▶ compare workers ─▶ [results] ─▶ collector
//!                          │                                                  ▲
//!                          └──── cache hits and per-unit errors ──────────────┘
//! ```
//!
//! - Decode: read both inputs, hash the raw bytes, consult the result cache,
//!   and on a miss decode both sides (through the document cache)
//! - Compare: run the difference engine and store the result in the cache
//!
//! Channels are bounded, so a slow compare stage back-pressures decoding.
//! Each stage spawns its ceiling of workers; an `AdaptiveLimiter` fed by the
//! `ResourceSampler` decides how many of them may work at once. Every unit
//! yields exactly one record, or is counted as not started when the batch is
//! cancelled before the unit was admitted.

use log::error;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::cache::{CacheKey, DocumentCache, DocumentKey, ResultCache};
use crate::constants::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_SAMPLE_INTERVAL, PHASE_COMPARE};
use crate::diff::Comparator;
use crate::document::{Decoder, Document};
use crate::logging::EventLogger;
use crate::models::{ErrorKind, FilePair, OutcomeTag, UnitPayload, UnitResult};
use crate::output::progress::ProgressReporter;
use crate::rules::RuleSet;

pub mod limiter;
pub mod pressure;

pub use limiter::{AdaptiveLimiter, LimiterPermit};
pub use pressure::{
    PressureGauge, PressureLevel, PressureReading, PressureSource, PressureThresholds,
    ResourceSampler, SystemPressure,
};

pub const STAGE_DECODE: &str = "decode";
pub const STAGE_COMPARE: &str = "compare";

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Floor and ceiling of a stage's worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    pub floor: usize,
    pub ceiling: usize,
}

impl WorkerBounds {
    pub fn new(floor: usize, ceiling: usize) -> Self {
        Self { floor, ceiling }
    }

    /// One to the number of available cores
    pub fn for_host() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(1, cores)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub decode_workers: WorkerBounds,
    pub compare_workers: WorkerBounds,
    pub channel_capacity: usize,
    /// Whether the resource sampler adjusts pool sizes
    pub adaptive: bool,
    pub sample_interval: Duration,
    pub thresholds: PressureThresholds,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            decode_workers: WorkerBounds::for_host(),
            compare_workers: WorkerBounds::for_host(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            adaptive: true,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            thresholds: PressureThresholds::default(),
        }
    }
}

/// Where a pair's raw bytes come from
#[derive(Debug, Clone)]
pub enum PairSource {
    Files { path_a: PathBuf, path_b: PathBuf },
    Bodies { a: Arc<[u8]>, b: Arc<[u8]> },
}

/// One unit of work for the pipeline
#[derive(Debug, Clone)]
pub struct PairJob {
    pub id: String,
    pub model: String,
    pub source: PairSource,
    /// Dispatch classification, carried through to the record
    pub tag: Option<OutcomeTag>,
}

impl PairJob {
    pub fn from_files(pair: FilePair, model: impl Into<String>) -> Self {
        Self {
            id: pair.id,
            model: model.into(),
            source: PairSource::Files {
                path_a: pair.path_a,
                path_b: pair.path_b,
            },
            tag: None,
        }
    }

    pub fn from_bodies(
        id: impl Into<String>,
        model: impl Into<String>,
        a: Arc<[u8]>,
        b: Arc<[u8]>,
        tag: Option<OutcomeTag>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            source: PairSource::Bodies { a, b },
            tag,
        }
    }
}

/// Everything a pipeline run produced
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// One record per admitted unit, in completion order
    pub results: Vec<UnitResult>,
    pub not_started: usize,
    pub cancelled: bool,
}

struct Decoded {
    id: String,
    tag: Option<OutcomeTag>,
    key: CacheKey,
    a: Arc<Document>,
    b: Arc<Document>,
}

enum StageOutput {
    /// Terminal record produced early (cache hit or per-unit error)
    Done(UnitResult),
    Next(Decoded),
}

/// Decode/compare pipeline sharing one result cache across runs
#[derive(Clone)]
pub struct Pipeline {
    decoder: Arc<dyn Decoder>,
    comparator: Arc<dyn Comparator>,
    results: ResultCache,
    documents: DocumentCache,
    pressure: Arc<dyn PressureSource>,
    settings: PipelineSettings,
    events: EventLogger,
}

impl Pipeline {
    pub fn new(
        decoder: Arc<dyn Decoder>,
        comparator: Arc<dyn Comparator>,
        results: ResultCache,
        documents: DocumentCache,
    ) -> Self {
        Self {
            decoder,
            comparator,
            results,
            documents,
            pressure: Arc::new(SystemPressure::new()),
            settings: PipelineSettings::default(),
            events: EventLogger::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pressure_source(mut self, source: Arc<dyn PressureSource>) -> Self {
        self.pressure = source;
        self
    }

    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn document_cache(&self) -> &DocumentCache {
        &self.documents
    }

    /// Decode and compare every job under one rule set
    pub async fn run(
        &self,
        jobs: Vec<PairJob>,
        rules: Arc<RuleSet>,
        cancel: Arc<AtomicBool>,
        progress: &ProgressReporter,
    ) -> PipelineOutput {
        let total = jobs.len();
        if total == 0 {
            return PipelineOutput::default();
        }
        let expected: Vec<(String, Option<OutcomeTag>)> =
            jobs.iter().map(|job| (job.id.clone(), job.tag)).collect();

        let capacity = self.settings.channel_capacity.max(1);
        let (job_tx, job_rx) = mpsc::channel::<PairJob>(capacity);
        let (decoded_tx, decoded_rx) = mpsc::channel::<Decoded>(capacity);
        let (out_tx, mut out_rx) = mpsc::channel::<UnitResult>(capacity);
        let job_rx: SharedReceiver<PairJob> = Arc::new(Mutex::new(job_rx));
        let decoded_rx: SharedReceiver<Decoded> = Arc::new(Mutex::new(decoded_rx));

        let decode_bounds = self.settings.decode_workers;
        let compare_bounds = self.settings.compare_workers;
        let decode_limiter = AdaptiveLimiter::new(STAGE_DECODE, decode_bounds.floor, decode_bounds.ceiling);
        let compare_limiter =
            AdaptiveLimiter::new(STAGE_COMPARE, compare_bounds.floor, compare_bounds.ceiling);

        let sampler = self.settings.adaptive.then(|| {
            ResourceSampler::new(
                Arc::clone(&self.pressure),
                self.settings.thresholds,
                self.settings.sample_interval,
                vec![Arc::clone(&decode_limiter), Arc::clone(&compare_limiter)],
            )
            .spawn()
        });

        let mut workers = JoinSet::new();
        for _ in 0..decode_limiter.ceiling() {
            let stage = self.clone();
            let jobs = Arc::clone(&job_rx);
            let next = decoded_tx.clone();
            let out = out_tx.clone();
            let limiter = Arc::clone(&decode_limiter);
            let rules = Arc::clone(&rules);
            let cancel = Arc::clone(&cancel);
            workers.spawn(async move {
                stage.decode_worker(jobs, next, out, limiter, rules, cancel).await;
            });
        }
        for _ in 0..compare_limiter.ceiling() {
            let stage = self.clone();
            let units = Arc::clone(&decoded_rx);
            let out = out_tx.clone();
            let limiter = Arc::clone(&compare_limiter);
            let rules = Arc::clone(&rules);
            workers.spawn(async move {
                stage.compare_worker(units, out, limiter, rules).await;
            });
        }
        drop(decoded_tx);
        drop(out_tx);

        let feeder_cancel = Arc::clone(&cancel);
        let feeder = async move {
            for job in jobs {
                if feeder_cancel.load(Ordering::SeqCst) {
                    break;
                }
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        };

        let collector = async {
            let mut results = Vec::with_capacity(total);
            while let Some(result) = out_rx.recv().await {
                if let UnitPayload::Error { error } = &result.payload {
                    self.events.unit_failed(&result.id, error.kind, &error.message);
                }
                results.push(result);
                progress.report(results.len(), total, PHASE_COMPARE);
            }
            results
        };

        let ((), mut results) = tokio::join!(feeder, collector);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("pipeline worker failed: {}", e);
            }
        }
        if let Some(handle) = sampler {
            handle.abort();
        }

        let cancelled = cancel.load(Ordering::SeqCst);
        let seen: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
        let mut not_started = 0;
        for (id, tag) in expected {
            if seen.contains(&id) {
                continue;
            }
            if cancelled {
                not_started += 1;
            } else {
                results.push(
                    UnitResult::error(id, ErrorKind::Internal, "worker stopped before producing a result")
                        .tagged(tag),
                );
            }
        }

        PipelineOutput {
            results,
            not_started,
            cancelled,
        }
    }

    async fn decode_worker(
        self,
        jobs: SharedReceiver<PairJob>,
        next: mpsc::Sender<Decoded>,
        out: mpsc::Sender<UnitResult>,
        limiter: Arc<AdaptiveLimiter>,
        rules: Arc<RuleSet>,
        cancel: Arc<AtomicBool>,
    ) {
        loop {
            let received = jobs.lock().await.recv().await;
            let Some(job) = received else {
                break;
            };
            // Admission boundary: nothing new starts once cancelled
            if cancel.load(Ordering::SeqCst) {
                continue;
            }

            // A closed limiter ends the worker; the unit is reported by the sweep
            let output = match limiter.acquire().await {
                Some(_permit) => self.decode_unit(job, &rules).await,
                None => break,
            };
            let sent = match output {
                StageOutput::Done(result) => out.send(result).await.is_ok(),
                StageOutput::Next(unit) => next.send(unit).await.is_ok(),
            };
            if !sent {
                break;
            }
        }
    }

    async fn compare_worker(
        self,
        units: SharedReceiver<Decoded>,
        out: mpsc::Sender<UnitResult>,
        limiter: Arc<AdaptiveLimiter>,
        rules: Arc<RuleSet>,
    ) {
        loop {
            let received = units.lock().await.recv().await;
            let Some(unit) = received else {
                break;
            };

            let result = match limiter.acquire().await {
                Some(_permit) => self.compare_unit(unit, &rules).await,
                None => break,
            };
            if out.send(result).await.is_err() {
                break;
            }
        }
    }

    async fn decode_unit(&self, job: PairJob, rules: &RuleSet) -> StageOutput {
        let PairJob {
            id,
            model,
            source,
            tag,
        } = job;

        let (raw_a, raw_b) = match read_source(source).await {
            Ok(bytes) => bytes,
            Err(message) => {
                return StageOutput::Done(UnitResult::error(id, ErrorKind::Read, message).tagged(tag))
            }
        };

        let key = CacheKey::from_bytes(&raw_a, &raw_b, rules.fingerprint());
        if let Some(result) = self.results.try_get(&key) {
            return StageOutput::Done(UnitResult::structural(id, result, true).tagged(tag));
        }

        let a = match self.decode_side(&model, raw_a, key.content_a).await {
            Ok(document) => document,
            Err((kind, message)) => {
                return StageOutput::Done(
                    UnitResult::error(id, kind, format!("side A: {}", message)).tagged(tag),
                )
            }
        };
        let b = match self.decode_side(&model, raw_b, key.content_b).await {
            Ok(document) => document,
            Err((kind, message)) => {
                return StageOutput::Done(
                    UnitResult::error(id, kind, format!("side B: {}", message)).tagged(tag),
                )
            }
        };

        StageOutput::Next(Decoded { id, tag, key, a, b })
    }

    async fn decode_side(
        &self,
        model: &str,
        raw: Arc<[u8]>,
        content: u64,
    ) -> Result<Arc<Document>, (ErrorKind, String)> {
        let doc_key = DocumentKey::new(model, content);
        if let Some(document) = self.documents.get(&doc_key) {
            return Ok(document);
        }

        let decoder = Arc::clone(&self.decoder);
        let model = model.to_string();
        match tokio::task::spawn_blocking(move || decoder.decode(&model, &raw)).await {
            Ok(Ok(document)) => Ok(self.documents.put(doc_key, document)),
            Ok(Err(e)) => Err((ErrorKind::Decode, e.to_string())),
            Err(e) => Err((ErrorKind::Internal, format!("decoder task failed: {}", e))),
        }
    }

    async fn compare_unit(&self, unit: Decoded, rules: &Arc<RuleSet>) -> UnitResult {
        let Decoded { id, tag, key, a, b } = unit;
        let comparator = Arc::clone(&self.comparator);
        let rules = Arc::clone(rules);

        match tokio::task::spawn_blocking(move || comparator.compare(&a, &b, &rules)).await {
            Ok(result) => {
                let shared = self.results.put(key, result);
                UnitResult::structural(id, shared, false).tagged(tag)
            }
            Err(e) => UnitResult::error(id, ErrorKind::Internal, format!("comparison task failed: {}", e))
                .tagged(tag),
        }
    }
}

async fn read_source(source: PairSource) -> Result<(Arc<[u8]>, Arc<[u8]>), String> {
    match source {
        PairSource::Bodies { a, b } => Ok((a, b)),
        PairSource::Files { path_a, path_b } => {
            let a = tokio::fs::read(&path_a)
                .await
                .map_err(|e| format!("{}: {}", path_a.display(), e))?;
            let b = tokio::fs::read(&path_b)
                .await
                .map_err(|e| format!("{}: {}", path_b.display(), e))?;
            Ok((Arc::from(a), Arc::from(b)))
        }
    }
}
