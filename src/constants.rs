//! Global constants for divergent
//!
//! Centralized location for application-wide defaults

use std::time::Duration;

/// Target name used as the log prefix for structured batch events
pub const APP_LOG_TARGET: &str = "divergent";

/// Default maximum nesting depth walked by the difference engine
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Upper bound accepted for a configured maximum depth
pub const MAX_DEPTH_LIMIT: usize = 64;

/// Default cap on differences collected for a single pair
pub const DEFAULT_MAX_DIFFERENCES: usize = 1000;

/// Description of the synthetic difference emitted when the depth limit is hit
pub const DEPTH_ABORT_MESSAGE: &str = "comparison aborted: max depth exceeded";

/// Time-to-live for cached comparison results
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Time-to-live for cached decoded documents
pub const DEFAULT_DOCUMENT_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Hard ceiling on cached entries per cache
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 50_000;

/// Hard ceiling on estimated cache memory, in megabytes
pub const DEFAULT_CACHE_MAX_MEMORY_MB: u64 = 512;

/// Minimum wall-clock time between two opportunistic cleanups
pub const DEFAULT_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Number of independent maps backing each cache
pub const CACHE_SHARD_COUNT: usize = 16;

/// Capacity of the bounded channels between pipeline stages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How often the resource sampler refreshes CPU and memory readings
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// CPU usage (percent) above which worker pools shrink
pub const DEFAULT_CPU_HIGH_WATERMARK: f32 = 90.0;

/// CPU usage (percent) below which worker pools may grow again
pub const DEFAULT_CPU_LOW_WATERMARK: f32 = 70.0;

/// Fraction of total memory that must stay available before pools shrink
pub const DEFAULT_MIN_AVAILABLE_MEMORY_RATIO: f64 = 0.10;

/// Default maximum number of units dispatched to the endpoints at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default per-call timeout for endpoint requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte ceiling applied to response bodies before raw-text diffing
pub const DEFAULT_MAX_RAW_BODY_BYTES: usize = 5 * 1024;

/// Default ceiling on a response body read from an endpoint
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

/// Minimum interval between two progress callbacks
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Default content type for replayed request bodies
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Default decoder model name used in file mode
pub const DEFAULT_MODEL_NAME: &str = "json";

/// Progress phase labels
pub const PHASE_DISPATCH: &str = "dispatch";
pub const PHASE_COMPARE: &str = "compare";
pub const PHASE_FALLBACK: &str = "raw-text";

/// Directory under the user config dir holding the configuration file
pub const CONFIG_DIR_NAME: &str = "divergent";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";
