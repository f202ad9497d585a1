//! Dual-endpoint dispatch
//!
//! Each request unit is sent to endpoint A and endpoint B concurrently. A
//! fixed pool of workers pulls units from a bounded queue, and a semaphore
//! caps the number of units in flight across every batch sharing the
//! dispatcher. Calls carry their own timeout; failures are captured with
//! their message and never retried here.

use log::error;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::constants::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_RAW_BODY_BYTES, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_REQUEST_TIMEOUT,
    PHASE_DISPATCH,
};
use crate::models::{ExecutionOutcome, OutcomeTag, RequestPairUnit};
use crate::output::progress::ProgressReporter;

pub mod classify;
pub mod raw_text;

pub use classify::{classify, is_success_status};
pub use raw_text::RawTextComparator;

/// Which endpoint a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// A captured endpoint response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Arc<[u8]>,
    pub elapsed: Duration,
}

/// Why one side of a dispatch produced no response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl DispatchError {
    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            DispatchError::Timeout(timeout)
        } else if error.is_connect() {
            DispatchError::Connect(error.to_string())
        } else {
            DispatchError::Request(error.to_string())
        }
    }
}

/// Transport used by the dispatcher; tests substitute an in-process fake
pub trait EndpointClient: Send + Sync {
    fn send(
        &self,
        side: Side,
        unit: &RequestPairUnit,
    ) -> impl Future<Output = Result<EndpointResponse, DispatchError>> + Send;
}

/// Headers configured for one side of a unit
pub fn headers_for(unit: &RequestPairUnit, side: Side) -> &[(String, String)] {
    match side {
        Side::A => &unit.headers_a,
        Side::B => &unit.headers_b,
    }
}

/// POSTs each unit body to two fixed endpoints with reqwest
///
/// Bodies are streamed. A success body larger than `max_response_bytes`
/// fails the side; a non-success body is only needed for raw-text diffing,
/// so reading stops one byte past `max_raw_body_bytes`.
#[derive(Debug, Clone)]
pub struct HttpEndpointClient {
    client: reqwest::Client,
    endpoint_a: String,
    endpoint_b: String,
    timeout: Duration,
    max_response_bytes: usize,
    max_raw_body_bytes: usize,
}

impl HttpEndpointClient {
    pub fn new(
        endpoint_a: impl Into<String>,
        endpoint_b: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DispatchError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint_a: endpoint_a.into(),
            endpoint_b: endpoint_b.into(),
            timeout,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_raw_body_bytes: DEFAULT_MAX_RAW_BODY_BYTES,
        })
    }

    pub fn with_body_limits(mut self, max_response_bytes: usize, max_raw_body_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes.max(1);
        self.max_raw_body_bytes = max_raw_body_bytes.max(1);
        self
    }

    pub fn endpoint(&self, side: Side) -> &str {
        match side {
            Side::A => &self.endpoint_a,
            Side::B => &self.endpoint_b,
        }
    }
}

impl EndpointClient for HttpEndpointClient {
    async fn send(&self, side: Side, unit: &RequestPairUnit) -> Result<EndpointResponse, DispatchError> {
        let mut request = self
            .client
            .post(self.endpoint(side))
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, unit.content_type.as_str())
            .body(unit.body.to_vec());
        for (name, value) in headers_for(unit, side) {
            request = request.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let mut response = request
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest(e, self.timeout))?;
        let status = response.status().as_u16();

        let success = is_success_status(status);
        let limit = if success {
            self.max_response_bytes
        } else {
            self.max_raw_body_bytes.saturating_add(1)
        };
        if success && response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(DispatchError::BodyTooLarge(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DispatchError::from_reqwest(e, self.timeout))?
        {
            let room = limit - body.len();
            if chunk.len() <= room {
                body.extend_from_slice(&chunk);
                continue;
            }
            if success {
                return Err(DispatchError::BodyTooLarge(limit));
            }
            body.extend_from_slice(&chunk[..room]);
            break;
        }

        Ok(EndpointResponse {
            status,
            body: Arc::from(body),
            elapsed: started.elapsed(),
        })
    }
}

/// Both sides of one dispatched unit, classified
#[derive(Debug, Clone)]
pub struct DispatchedPair {
    pub id: String,
    pub side_a: Result<EndpointResponse, DispatchError>,
    pub side_b: Result<EndpointResponse, DispatchError>,
    pub outcome: ExecutionOutcome,
}

impl DispatchedPair {
    pub fn new(
        id: impl Into<String>,
        side_a: Result<EndpointResponse, DispatchError>,
        side_b: Result<EndpointResponse, DispatchError>,
    ) -> Self {
        let outcome = match (&side_a, &side_b) {
            (Ok(a), Ok(b)) => classify(true, a.status, b.status),
            _ => classify(false, 0, 0),
        };
        Self {
            id: id.into(),
            side_a,
            side_b,
            outcome,
        }
    }

    pub fn status_a(&self) -> Option<u16> {
        self.side_a.as_ref().ok().map(|r| r.status)
    }

    pub fn status_b(&self) -> Option<u16> {
        self.side_b.as_ref().ok().map(|r| r.status)
    }

    pub fn tag(&self) -> OutcomeTag {
        OutcomeTag {
            outcome: self.outcome,
            status_a: self.status_a(),
            status_b: self.status_b(),
        }
    }

    /// Verbatim failure messages of the failed side(s)
    pub fn failure_message(&self) -> String {
        let mut parts = Vec::new();
        if let Err(e) = &self.side_a {
            parts.push(format!("endpoint A: {}", e));
        }
        if let Err(e) = &self.side_b {
            parts.push(format!("endpoint B: {}", e));
        }
        parts.join("; ")
    }
}

/// Result of dispatching a batch
#[derive(Debug, Default)]
pub struct DispatchOutput {
    pub pairs: Vec<DispatchedPair>,
    pub not_started: usize,
    pub cancelled: bool,
}

/// Bounded-concurrency dual-endpoint dispatcher
pub struct Dispatcher<C> {
    client: Arc<C>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: self.max_in_flight,
        }
    }
}

impl<C: EndpointClient + 'static> Dispatcher<C> {
    pub fn new(client: C, max_in_flight: usize) -> Self {
        Self::from_shared(Arc::new(client), max_in_flight)
    }

    pub fn from_shared(client: Arc<C>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            client,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Send one unit to both endpoints at once and classify the pair
    pub async fn dispatch_one(&self, unit: &RequestPairUnit) -> DispatchedPair {
        dispatch_pair(self.client.as_ref(), unit).await
    }

    /// Dispatch every unit; one pair per admitted unit
    pub async fn dispatch_all(
        &self,
        units: Vec<RequestPairUnit>,
        cancel: Arc<AtomicBool>,
        progress: &ProgressReporter,
    ) -> DispatchOutput {
        let total = units.len();
        if total == 0 {
            return DispatchOutput::default();
        }
        let expected: Vec<String> = units.iter().map(|u| u.relative_id.clone()).collect();

        let (unit_tx, unit_rx) = mpsc::channel::<RequestPairUnit>(self.max_in_flight);
        let (out_tx, mut out_rx) = mpsc::channel::<DispatchedPair>(self.max_in_flight);
        let unit_rx = Arc::new(Mutex::new(unit_rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.max_in_flight.min(total) {
            let client = Arc::clone(&self.client);
            let in_flight = Arc::clone(&self.in_flight);
            let units = Arc::clone(&unit_rx);
            let out = out_tx.clone();
            let cancel = Arc::clone(&cancel);
            workers.spawn(async move {
                loop {
                    let received = units.lock().await.recv().await;
                    let Some(unit) = received else {
                        break;
                    };
                    if cancel.load(Ordering::SeqCst) {
                        continue;
                    }
                    let pair = {
                        let _permit = in_flight.acquire().await.ok();
                        dispatch_pair(client.as_ref(), &unit).await
                    };
                    if out.send(pair).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);

        let feeder_cancel = Arc::clone(&cancel);
        let feeder = async move {
            for unit in units {
                if feeder_cancel.load(Ordering::SeqCst) {
                    break;
                }
                if unit_tx.send(unit).await.is_err() {
                    break;
                }
            }
        };
        let collector = async {
            let mut pairs = Vec::with_capacity(total);
            while let Some(pair) = out_rx.recv().await {
                pairs.push(pair);
                progress.report(pairs.len(), total, PHASE_DISPATCH);
            }
            pairs
        };
        let ((), mut pairs) = tokio::join!(feeder, collector);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("dispatch worker failed: {}", e);
            }
        }

        let cancelled = cancel.load(Ordering::SeqCst);
        let seen: HashSet<String> = pairs.iter().map(|p| p.id.clone()).collect();
        let mut not_started = 0;
        for id in expected {
            if seen.contains(&id) {
                continue;
            }
            if cancelled {
                not_started += 1;
            } else {
                let lost = || Err(DispatchError::Request("dispatch worker stopped".to_string()));
                pairs.push(DispatchedPair::new(id, lost(), lost()));
            }
        }

        DispatchOutput {
            pairs,
            not_started,
            cancelled,
        }
    }
}

impl Dispatcher<HttpEndpointClient> {
    /// HTTP dispatcher with default concurrency and timeout
    pub fn http(endpoint_a: &str, endpoint_b: &str) -> Result<Self, DispatchError> {
        let client = HttpEndpointClient::new(endpoint_a, endpoint_b, DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::new(client, DEFAULT_MAX_IN_FLIGHT))
    }
}

async fn dispatch_pair<C: EndpointClient>(client: &C, unit: &RequestPairUnit) -> DispatchedPair {
    let (side_a, side_b) = tokio::join!(client.send(Side::A, unit), client.send(Side::B, unit));
    DispatchedPair::new(unit.relative_id.clone(), side_a, side_b)
}
