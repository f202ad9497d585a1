//! Configuration management
//!
//! Handles TOML configuration parsing, validation and command-line overrides.
//! Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::batch::ComparisonService;
use crate::cache::{CachePolicy, DocumentCache, ResultCache};
use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CACHE_CLEANUP_INTERVAL, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_MAX_MEMORY_MB, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONTENT_TYPE, DEFAULT_CPU_HIGH_WATERMARK,
    DEFAULT_CPU_LOW_WATERMARK, DEFAULT_DOCUMENT_TTL, DEFAULT_MAX_DEPTH, DEFAULT_MAX_DIFFERENCES,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_RAW_BODY_BYTES, DEFAULT_MAX_RESPONSE_BYTES,
    DEFAULT_MIN_AVAILABLE_MEMORY_RATIO, DEFAULT_MODEL_NAME,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_RESULT_TTL, DEFAULT_SAMPLE_INTERVAL, MAX_DEPTH_LIMIT,
};
use crate::diff::{DedupPolicy, DiffEngine};
use crate::dispatch::RawTextComparator;
use crate::document::JsonDecoder;
use crate::pipeline::{Pipeline, PipelineSettings, PressureThresholds, WorkerBounds};
use crate::rules::{IgnoreRule, RuleError, RuleSet, SmartIgnoreRule};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Rules(#[from] RuleError),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    pub engine: EngineSettings,
    pub rules: RulesSettings,
    pub cache: CacheSettings,
    pub pipeline: PipelineConfig,
    pub dispatch: DispatchSettings,
}

/// Difference engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Nesting depth walked before aborting (1-64)
    pub max_depth: usize,
    /// Differences collected per pair before truncating
    pub max_differences: usize,
    pub dedup_policy: DedupPolicy,
    /// Model name passed to the decoder
    pub model: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_differences: DEFAULT_MAX_DIFFERENCES,
            dedup_policy: DedupPolicy::default(),
            model: DEFAULT_MODEL_NAME.to_string(),
        }
    }
}

/// Rule set as written in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSettings {
    pub ignore_collection_order: bool,
    pub case_sensitive: bool,
    pub ignore: Vec<IgnoreRule>,
    pub smart: Vec<SmartIgnoreRule>,
}

impl Default for RulesSettings {
    fn default() -> Self {
        Self {
            ignore_collection_order: false,
            case_sensitive: true,
            ignore: Vec::new(),
            smart: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub result_ttl_secs: u64,
    pub document_ttl_secs: u64,
    pub max_entries: usize,
    pub max_memory_mb: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            result_ttl_secs: DEFAULT_RESULT_TTL.as_secs(),
            document_ttl_secs: DEFAULT_DOCUMENT_TTL.as_secs(),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_memory_mb: DEFAULT_CACHE_MAX_MEMORY_MB,
            cleanup_interval_secs: DEFAULT_CACHE_CLEANUP_INTERVAL.as_secs(),
        }
    }
}

/// Worker pool bounds; a ceiling of 0 means "number of cores"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decode_min_workers: usize,
    pub decode_max_workers: usize,
    pub compare_min_workers: usize,
    pub compare_max_workers: usize,
    pub channel_capacity: usize,
    pub adaptive: bool,
    pub sample_interval_ms: u64,
    pub cpu_high_watermark: f32,
    pub cpu_low_watermark: f32,
    pub min_available_memory_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_min_workers: 1,
            decode_max_workers: 0,
            compare_min_workers: 1,
            compare_max_workers: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            adaptive: true,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
            cpu_high_watermark: DEFAULT_CPU_HIGH_WATERMARK,
            cpu_low_watermark: DEFAULT_CPU_LOW_WATERMARK,
            min_available_memory_ratio: DEFAULT_MIN_AVAILABLE_MEMORY_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub endpoint_a: Option<String>,
    pub endpoint_b: Option<String>,
    pub max_in_flight: usize,
    pub timeout_ms: u64,
    pub max_raw_body_bytes: usize,
    /// Ceiling on any response body read from an endpoint
    pub max_response_bytes: usize,
    pub content_type: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            endpoint_a: None,
            endpoint_b: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            max_raw_body_bytes: DEFAULT_MAX_RAW_BODY_BYTES,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// Command-line values layered over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub max_differences: Option<usize>,
    pub max_depth: Option<usize>,
    pub max_in_flight: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub ignore_collection_order: bool,
    pub case_insensitive: bool,
    pub model: Option<String>,
    pub ignore_paths: Vec<String>,
    pub smart_patterns: Vec<String>,
}

/// `<config dir>/divergent/config.toml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn resolve_workers(floor: usize, ceiling: usize) -> WorkerBounds {
    let ceiling = if ceiling == 0 {
        WorkerBounds::for_host().ceiling
    } else {
        ceiling
    };
    WorkerBounds::new(floor.max(1), ceiling.max(floor.max(1)))
}

impl EngineConfiguration {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path must exist; the default path is used only when present
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.max_depth == 0 || engine.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "engine.max_depth must be between 1 and {}",
                MAX_DEPTH_LIMIT
            )));
        }
        if engine.max_differences == 0 {
            return Err(ConfigError::Invalid("engine.max_differences must be at least 1".to_string()));
        }
        if engine.model.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.model must not be empty".to_string()));
        }

        let cache = &self.cache;
        if cache.result_ttl_secs == 0 || cache.document_ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache TTLs must be greater than zero".to_string()));
        }
        if cache.max_entries == 0 || cache.max_memory_mb == 0 {
            return Err(ConfigError::Invalid("cache ceilings must be greater than zero".to_string()));
        }

        let pipeline = &self.pipeline;
        for (stage, floor, ceiling) in [
            ("decode", pipeline.decode_min_workers, pipeline.decode_max_workers),
            ("compare", pipeline.compare_min_workers, pipeline.compare_max_workers),
        ] {
            if floor == 0 {
                return Err(ConfigError::Invalid(format!("pipeline.{}_min_workers must be at least 1", stage)));
            }
            if ceiling != 0 && ceiling < floor {
                return Err(ConfigError::Invalid(format!(
                    "pipeline.{}_max_workers ({}) is below {}_min_workers ({})",
                    stage, ceiling, stage, floor
                )));
            }
        }
        if pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid("pipeline.channel_capacity must be at least 1".to_string()));
        }
        if pipeline.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid("pipeline.sample_interval_ms must be greater than zero".to_string()));
        }
        if !(0.0..=100.0).contains(&pipeline.cpu_high_watermark)
            || !(0.0..=100.0).contains(&pipeline.cpu_low_watermark)
            || pipeline.cpu_low_watermark > pipeline.cpu_high_watermark
        {
            return Err(ConfigError::Invalid(
                "pipeline CPU watermarks must satisfy 0 <= low <= high <= 100".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&pipeline.min_available_memory_ratio) {
            return Err(ConfigError::Invalid(
                "pipeline.min_available_memory_ratio must be in [0, 1)".to_string(),
            ));
        }

        let dispatch = &self.dispatch;
        if dispatch.max_in_flight == 0 {
            return Err(ConfigError::Invalid("dispatch.max_in_flight must be at least 1".to_string()));
        }
        if dispatch.timeout_ms == 0 {
            return Err(ConfigError::Invalid("dispatch.timeout_ms must be greater than zero".to_string()));
        }
        if dispatch.max_raw_body_bytes == 0 {
            return Err(ConfigError::Invalid("dispatch.max_raw_body_bytes must be at least 1".to_string()));
        }
        if dispatch.max_response_bytes < dispatch.max_raw_body_bytes {
            return Err(ConfigError::Invalid(
                "dispatch.max_response_bytes must be at least dispatch.max_raw_body_bytes".to_string(),
            ));
        }

        self.rule_set()?;
        Ok(())
    }

    /// Layer command-line values over the file and re-validate
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(cap) = overrides.max_differences {
            self.engine.max_differences = cap;
        }
        if let Some(depth) = overrides.max_depth {
            self.engine.max_depth = depth;
        }
        if let Some(model) = &overrides.model {
            self.engine.model = model.clone();
        }
        if let Some(in_flight) = overrides.max_in_flight {
            self.dispatch.max_in_flight = in_flight;
        }
        if let Some(timeout) = overrides.timeout_ms {
            self.dispatch.timeout_ms = timeout;
        }
        if overrides.ignore_collection_order {
            self.rules.ignore_collection_order = true;
        }
        if overrides.case_insensitive {
            self.rules.case_sensitive = false;
        }
        self.rules
            .ignore
            .extend(overrides.ignore_paths.iter().map(IgnoreRule::value));
        self.rules
            .smart
            .extend(overrides.smart_patterns.iter().map(SmartIgnoreRule::new));
        self.validate()
    }

    pub fn rule_set(&self) -> Result<RuleSet, RuleError> {
        let mut builder = RuleSet::builder()
            .ignore_collection_order(self.rules.ignore_collection_order)
            .case_sensitive(self.rules.case_sensitive);
        for rule in &self.rules.ignore {
            builder = builder.rule(rule.clone());
        }
        for rule in &self.rules.smart {
            builder = builder.smart(rule.clone());
        }
        builder.build()
    }

    pub fn diff_engine(&self) -> DiffEngine {
        DiffEngine::new()
            .with_max_depth(self.engine.max_depth)
            .with_max_differences(self.engine.max_differences)
            .with_dedup_policy(self.engine.dedup_policy)
    }

    pub fn result_cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(self.cache.result_ttl_secs),
            max_entries: self.cache.max_entries,
            max_memory_bytes: self.cache.max_memory_mb * 1024 * 1024,
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
        }
    }

    pub fn document_cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(self.cache.document_ttl_secs),
            ..self.result_cache_policy()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.pipeline;
        PipelineSettings {
            decode_workers: resolve_workers(p.decode_min_workers, p.decode_max_workers),
            compare_workers: resolve_workers(p.compare_min_workers, p.compare_max_workers),
            channel_capacity: p.channel_capacity,
            adaptive: p.adaptive,
            sample_interval: Duration::from_millis(p.sample_interval_ms),
            thresholds: PressureThresholds {
                cpu_high: p.cpu_high_watermark,
                cpu_low: p.cpu_low_watermark,
                min_available_memory_ratio: p.min_available_memory_ratio,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.timeout_ms)
    }

    pub fn raw_text_comparator(&self) -> RawTextComparator {
        RawTextComparator::new(self.dispatch.max_raw_body_bytes)
    }

    /// Wire the JSON decoder, engine, caches and pipeline into a service
    pub fn build_service(&self) -> Result<ComparisonService, ConfigError> {
        let rules = self.rule_set()?;
        let pipeline = Pipeline::new(
            Arc::new(JsonDecoder::new()),
            Arc::new(self.diff_engine()),
            ResultCache::new(self.result_cache_policy()),
            DocumentCache::new(self.document_cache_policy()),
        )
        .with_settings(self.pipeline_settings());

        Ok(ComparisonService::new(pipeline, rules)
            .with_raw_text(self.raw_text_comparator())
            .with_model(self.engine.model.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchTarget;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config = EngineConfiguration::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfiguration::default());
        assert_eq!(config.engine.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.rules.case_sensitive);
    }

    #[test]
    fn test_full_file_parses() {
        let toml = r#"
            [engine]
            max_depth = 8
            max_differences = 50
            dedup_policy = "fewest_index_segments"

            [rules]
            ignore_collection_order = true

            [[rules.ignore]]
            path = "Order.UpdatedAt"

            [[rules.ignore]]
            path = "Order.Lines"
            ignore_value = false
            ignore_order = true

            [[rules.smart]]
            pattern = "(?i)timestamp$"
            target = "name"

            [cache]
            result_ttl_secs = 600

            [pipeline]
            decode_max_workers = 4
            compare_max_workers = 2

            [dispatch]
            endpoint_a = "http://before.local/api"
            endpoint_b = "http://after.local/api"
            max_in_flight = 16
            timeout_ms = 2500
        "#;

        let config = EngineConfiguration::from_toml_str(toml).unwrap();
        assert_eq!(config.engine.dedup_policy, DedupPolicy::FewestIndexSegments);
        assert_eq!(config.rules.ignore.len(), 2);
        assert!(config.rules.ignore[0].ignore_value);
        assert!(!config.rules.ignore[1].ignore_value);
        assert_eq!(config.rules.smart[0].target, MatchTarget::Name);
        assert!(config.rules.smart[0].enabled);
        assert_eq!(config.result_cache_policy().ttl, Duration::from_secs(600));
        assert_eq!(config.pipeline_settings().decode_workers, WorkerBounds::new(1, 4));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));

        let rules = config.rule_set().unwrap();
        assert!(rules.ignores_collection_order());
        assert!(rules.is_path_ignored("Order.UpdatedAt"));
        assert!(rules.is_order_insensitive("Order.Lines"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[engine]\nmax_depth = 0",
            "[engine]\nmax_depth = 65",
            "[engine]\nmax_differences = 0",
            "[pipeline]\ndecode_min_workers = 4\ndecode_max_workers = 2",
            "[pipeline]\nchannel_capacity = 0",
            "[pipeline]\ncpu_low_watermark = 95.0",
            "[dispatch]\ntimeout_ms = 0",
            "[dispatch]\nmax_in_flight = 0",
            "[dispatch]\nmax_raw_body_bytes = 4096\nmax_response_bytes = 1024",
            "[[rules.smart]]\npattern = \"(unclosed\"",
        ];
        for case in cases {
            assert!(EngineConfiguration::from_toml_str(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_overrides_layer_on_file() {
        let mut config = EngineConfiguration::default();
        let overrides = ConfigOverrides {
            max_differences: Some(10),
            ignore_collection_order: true,
            case_insensitive: true,
            ignore_paths: vec!["Id".to_string()],
            smart_patterns: vec!["Date$".to_string()],
            ..ConfigOverrides::default()
        };
        config.apply_overrides(&overrides).unwrap();

        assert_eq!(config.diff_engine().max_differences(), 10);
        let rules = config.rule_set().unwrap();
        assert!(rules.ignores_collection_order());
        assert!(!rules.is_case_sensitive());
        assert!(rules.is_path_ignored("Id"));
        assert_eq!(rules.smart_rules().len(), 1);

        let invalid = ConfigOverrides {
            max_depth: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(config.apply_overrides(&invalid).is_err());
    }

    #[test]
    fn test_load_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_differences = 25").unwrap();

        let config = EngineConfiguration::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_differences, 25);

        let rendered = config.to_toml_string().unwrap();
        assert_eq!(EngineConfiguration::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfiguration::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_zero_ceiling_means_host_cores() {
        let settings = EngineConfiguration::default().pipeline_settings();
        assert_eq!(settings.decode_workers, WorkerBounds::for_host());
    }

    #[test]
    fn test_default_config_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(Path::new(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)));
        }
    }

    #[test]
    fn test_build_service_uses_rules() {
        let mut config = EngineConfiguration::default();
        config.rules.ignore.push(IgnoreRule::value("Id"));
        let service = config.build_service().unwrap();
        assert!(service.active_rules().is_path_ignored("Id"));
        assert_eq!(service.model(), DEFAULT_MODEL_NAME);
    }
}
