//! Result cache
//!
//! Content-addressed memoization of comparison results. The key is computed
//! from raw bytes before decoding, so a hit skips decode and compare alike.

use log::debug;
use std::fmt;
use std::sync::Arc;

use super::{content_hash, CachePolicy, CacheStats, CleanupReport, TtlCache};
use crate::models::ComparisonResult;
use crate::rules::Fingerprint;

/// (content hash A, content hash B, rule-set fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_a: u64,
    pub content_b: u64,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(content_a: u64, content_b: u64, fingerprint: Fingerprint) -> Self {
        Self {
            content_a,
            content_b,
            fingerprint,
        }
    }

    /// Hash both raw inputs and combine with the fingerprint
    pub fn from_bytes(raw_a: &[u8], raw_b: &[u8], fingerprint: &Fingerprint) -> Self {
        Self::new(content_hash(raw_a), content_hash(raw_b), fingerprint.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}:{}", self.content_a, self.content_b, self.fingerprint)
    }
}

/// Shared cache of comparison results
#[derive(Clone)]
pub struct ResultCache {
    inner: TtlCache<CacheKey, ComparisonResult>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CachePolicy::results())
    }
}

impl ResultCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            inner: TtlCache::new(policy),
        }
    }

    /// Cached result for the key, if live
    ///
    /// An entry whose recorded fingerprint disagrees with its key is treated
    /// as corrupt: it is dropped and reported as a miss.
    pub fn try_get(&self, key: &CacheKey) -> Option<Arc<ComparisonResult>> {
        let result = self.inner.get(key)?;
        if result.fingerprint != key.fingerprint {
            debug!("dropping cache entry {} with mismatched fingerprint", key);
            self.inner.remove(key);
            return None;
        }
        Some(result)
    }

    /// Store a result; the returned handle is what later lookups will return
    pub fn put(&self, key: CacheKey, result: ComparisonResult) -> Arc<ComparisonResult> {
        self.inner.put(key, result)
    }

    pub fn put_shared(&self, key: CacheKey, result: Arc<ComparisonResult>) {
        self.inner.put_arc(key, result);
    }

    /// Remove every entry computed under a fingerprint other than `active`
    pub fn invalidate(&self, active: &Fingerprint) -> usize {
        let removed = self.inner.retain_keys(|key| &key.fingerprint == active);
        if removed > 0 {
            debug!("invalidated {} cached results (active rules {})", removed, active);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub fn cleanup(&self) -> CleanupReport {
        self.inner.cleanup()
    }
}
