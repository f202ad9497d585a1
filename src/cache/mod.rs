//! In-memory caches
//!
//! `TtlCache` is a sharded map of `Arc`'d values with two expiry policies:
//! a sliding time-to-live and pressure-based eviction once the entry count or
//! estimated memory crosses a ceiling. Cleanup never runs on the caller's
//! path: a write that finds the cleanup interval elapsed (or a ceiling
//! breached) hands the work to a short-lived background thread.
//!
//! Two caches are built on it: `ResultCache` for comparison results and
//! `DocumentCache` for decoded documents.

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::constants::{
    CACHE_SHARD_COUNT, DEFAULT_CACHE_CLEANUP_INTERVAL, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_MAX_MEMORY_MB, DEFAULT_DOCUMENT_TTL, DEFAULT_RESULT_TTL,
};
use crate::document::Document;
use crate::models::ComparisonResult;

pub mod documents;
pub mod result;

pub use documents::{DocumentCache, DocumentKey};
pub use result::{CacheKey, ResultCache};

/// Partial eviction trims the entry count to this share of the ceiling
const ENTRY_EVICTION_TARGET: f64 = 0.90;

/// Aggressive eviction trims estimated memory to this share of the ceiling
const MEMORY_EVICTION_TARGET: f64 = 0.75;

/// Fast non-cryptographic hash of raw input bytes
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

/// Estimated in-memory footprint of a cached value
pub trait Weighted {
    fn approx_size_bytes(&self) -> usize;
}

impl Weighted for ComparisonResult {
    fn approx_size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.fingerprint.as_str().len()
            + self
                .differences
                .iter()
                .map(|d| {
                    std::mem::size_of_val(d)
                        + d.property_path.len()
                        + d.value_a.as_ref().map_or(0, String::len)
                        + d.value_b.as_ref().map_or(0, String::len)
                        + d.description.as_ref().map_or(0, String::len)
                })
                .sum::<usize>()
    }
}

impl Weighted for Document {
    fn approx_size_bytes(&self) -> usize {
        Document::approx_size_bytes(self)
    }
}

/// Expiry and pressure settings for one cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_memory_bytes: u64,
    pub cleanup_interval: Duration,
}

impl CachePolicy {
    /// Defaults for comparison results
    pub fn results() -> Self {
        Self {
            ttl: DEFAULT_RESULT_TTL,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_memory_bytes: DEFAULT_CACHE_MAX_MEMORY_MB * 1024 * 1024,
            cleanup_interval: DEFAULT_CACHE_CLEANUP_INTERVAL,
        }
    }

    /// Defaults for decoded documents
    pub fn documents() -> Self {
        Self {
            ttl: DEFAULT_DOCUMENT_TTL,
            ..Self::results()
        }
    }
}

/// Point-in-time counters of a cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub approx_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
}

struct Entry<V> {
    value: Arc<V>,
    size: usize,
    /// Milliseconds since the cache epoch
    cached_at: u64,
    last_access: AtomicU64,
}

type Shard<K, V> = RwLock<FxHashMap<K, Entry<V>>>;

struct Inner<K, V> {
    shards: Vec<Shard<K, V>>,
    policy: CachePolicy,
    epoch: Instant,
    entries: AtomicUsize,
    bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    last_cleanup: AtomicU64,
    cleaning: AtomicBool,
}

/// Sharded, thread-safe cache with sliding TTL and pressure eviction
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Weighted + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        let shards = (0..CACHE_SHARD_COUNT)
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                shards,
                policy,
                epoch: Instant::now(),
                entries: AtomicUsize::new(0),
                bytes: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                last_cleanup: AtomicU64::new(0),
                cleaning: AtomicBool::new(false),
            }),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    /// Look up a live entry, refreshing its last-access time
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let inner = &self.inner;
        let now = inner.now_ms();
        let found = inner.shard(key).read().ok().and_then(|shard| {
            shard.get(key).and_then(|entry| {
                if inner.is_expired(entry, now) {
                    None
                } else {
                    entry.last_access.store(now, Ordering::Relaxed);
                    Some(Arc::clone(&entry.value))
                }
            })
        });

        match found {
            Some(_) => inner.hits.fetch_add(1, Ordering::Relaxed),
            None => inner.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert a value, returning the shared handle now held by the cache
    pub fn put(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.put_arc(key, Arc::clone(&value));
        value
    }

    pub fn put_arc(&self, key: K, value: Arc<V>) {
        let inner = &self.inner;
        let now = inner.now_ms();
        let size = value.approx_size_bytes();
        let entry = Entry {
            value,
            size,
            cached_at: now,
            last_access: AtomicU64::new(now),
        };

        match inner.shard(&key).write() {
            Ok(mut shard) => {
                if let Some(old) = shard.insert(key, entry) {
                    inner.bytes.fetch_sub(old.size as u64, Ordering::Relaxed);
                } else {
                    inner.entries.fetch_add(1, Ordering::Relaxed);
                }
                inner.bytes.fetch_add(size as u64, Ordering::Relaxed);
            }
            Err(_) => {
                debug!("cache shard lock poisoned; dropping write");
                return;
            }
        }

        self.maybe_cleanup();
    }

    /// Remove one key
    pub fn remove(&self, key: &K) -> bool {
        let removed = self
            .inner
            .shard(key)
            .write()
            .ok()
            .and_then(|mut shard| shard.remove(key));
        match removed {
            Some(entry) => {
                self.inner.account_removed(&entry);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key fails the predicate; counts as invalidation
    pub fn retain_keys<F>(&self, keep: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut removed = 0;
        for lock in &self.inner.shards {
            if let Ok(mut shard) = lock.write() {
                let doomed: Vec<K> = shard.keys().filter(|k| !keep(k)).cloned().collect();
                for key in doomed {
                    if let Some(entry) = shard.remove(&key) {
                        self.inner.account_removed(&entry);
                        removed += 1;
                    }
                }
            }
        }
        self.inner
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) -> usize {
        self.retain_keys(|_| false)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn approx_bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Age of an entry since it was inserted, if present
    pub fn entry_age(&self, key: &K) -> Option<Duration> {
        let now = self.inner.now_ms();
        let shard = self.inner.shard(key).read().ok()?;
        shard
            .get(key)
            .map(|entry| Duration::from_millis(now.saturating_sub(entry.cached_at)))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            entries: inner.entries.load(Ordering::Relaxed),
            approx_bytes: inner.bytes.load(Ordering::Relaxed),
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            evictions: inner.evictions.load(Ordering::Relaxed),
            expirations: inner.expirations.load(Ordering::Relaxed),
            invalidations: inner.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Run a full cleanup pass on the calling thread
    pub fn cleanup(&self) -> CleanupReport {
        self.inner.cleanup()
    }

    fn maybe_cleanup(&self) {
        let inner = &self.inner;
        let now = inner.now_ms();
        let interval = inner.policy.cleanup_interval.as_millis() as u64;
        let due = now.saturating_sub(inner.last_cleanup.load(Ordering::Relaxed)) >= interval;
        if !due && !inner.over_ceiling() {
            return;
        }
        if inner
            .cleaning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let worker = Arc::clone(inner);
        let spawned = std::thread::Builder::new()
            .name("divergent-cache-cleanup".to_string())
            .spawn(move || {
                worker.cleanup();
                worker.cleaning.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            warn!("Failed to start cache cleanup thread: {}", e);
            inner.cleaning.store(false, Ordering::Release);
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn is_expired(&self, entry: &Entry<V>, now: u64) -> bool {
        let idle = now.saturating_sub(entry.last_access.load(Ordering::Relaxed));
        u128::from(idle) >= self.policy.ttl.as_millis()
    }

    fn over_ceiling(&self) -> bool {
        self.entries.load(Ordering::Relaxed) > self.policy.max_entries
            || self.bytes.load(Ordering::Relaxed) > self.policy.max_memory_bytes
    }

    fn account_removed(&self, entry: &Entry<V>) {
        self.entries.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(entry.size as u64, Ordering::Relaxed);
    }

    fn cleanup(&self) -> CleanupReport {
        let now = self.now_ms();
        self.last_cleanup.store(now, Ordering::Relaxed);

        let mut report = CleanupReport::default();
        for lock in &self.shards {
            if let Ok(mut shard) = lock.write() {
                let expired: Vec<K> = shard
                    .iter()
                    .filter(|(_, entry)| self.is_expired(entry, now))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in expired {
                    if let Some(entry) = shard.remove(&key) {
                        self.account_removed(&entry);
                        report.expired += 1;
                    }
                }
            }
        }
        self.expirations
            .fetch_add(report.expired as u64, Ordering::Relaxed);

        let max_entries = self.policy.max_entries;
        if self.entries.load(Ordering::Relaxed) > max_entries {
            let target = (max_entries as f64 * ENTRY_EVICTION_TARGET) as usize;
            report.evicted += self.evict(now, |entries, _| entries > target, |age, _| age);
        }

        let max_bytes = self.policy.max_memory_bytes;
        if self.bytes.load(Ordering::Relaxed) > max_bytes {
            let target = (max_bytes as f64 * MEMORY_EVICTION_TARGET) as u64;
            report.evicted += self.evict(
                now,
                |_, bytes| bytes > target,
                |age, size| age.saturating_add(1).saturating_mul(size as u64),
            );
        }

        self.evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        if report.expired > 0 || report.evicted > 0 {
            debug!(
                "cache cleanup: {} expired, {} evicted, {} remaining",
                report.expired,
                report.evicted,
                self.entries.load(Ordering::Relaxed)
            );
        }
        report
    }

    /// Evict highest-scoring entries while `over` holds for (entries, bytes)
    fn evict<O, S>(&self, now: u64, over: O, score: S) -> usize
    where
        O: Fn(usize, u64) -> bool,
        S: Fn(u64, usize) -> u64,
    {
        let mut candidates: Vec<(u64, usize, K)> = Vec::new();
        for (index, lock) in self.shards.iter().enumerate() {
            if let Ok(shard) = lock.read() {
                for (key, entry) in shard.iter() {
                    let age = now.saturating_sub(entry.last_access.load(Ordering::Relaxed));
                    candidates.push((score(age, entry.size), index, key.clone()));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut evicted = 0;
        for (_, index, key) in candidates {
            if !over(
                self.entries.load(Ordering::Relaxed),
                self.bytes.load(Ordering::Relaxed),
            ) {
                break;
            }
            if let Ok(mut shard) = self.shards[index].write() {
                if let Some(entry) = shard.remove(&key) {
                    self.account_removed(&entry);
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Blob(usize);

    impl Weighted for Blob {
        fn approx_size_bytes(&self) -> usize {
            self.0
        }
    }

    fn policy() -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(60),
            max_entries: 1000,
            max_memory_bytes: 1 << 30,
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_content_hash_is_stable_and_discriminating() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_ne!(content_hash(b""), content_hash(b"\0"));
    }

    #[test]
    fn test_get_returns_same_arc() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(policy());
        let stored = cache.put(1, Blob(10));
        let fetched = cache.get(&1).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.approx_bytes(), 10);
    }

    #[test]
    fn test_replace_keeps_accounting() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(policy());
        cache.put(1, Blob(10));
        cache.put(1, Blob(30));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.approx_bytes(), 30);
        assert!(cache.remove(&1));
        assert!(cache.is_empty());
        assert_eq!(cache.approx_bytes(), 0);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(policy());
        cache.put(1, Blob(1));
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(CachePolicy {
            ttl: Duration::from_millis(30),
            ..policy()
        });
        cache.put(1, Blob(1));
        assert!(cache.get(&1).is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get(&1).is_none());

        let report = cache.cleanup();
        assert_eq!(report.expired, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_entry_ceiling_evicts_oldest_first() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(CachePolicy {
            max_entries: 10,
            ..policy()
        });
        for key in 0..10 {
            cache.put(key, Blob(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        for key in 5..10 {
            cache.get(&key);
        }
        for key in 10..12 {
            cache.put(key, Blob(1));
        }
        cache.cleanup();

        assert!(cache.len() <= 9);
        for key in 5..12 {
            assert!(cache.get(&key).is_some(), "recent key {key} evicted");
        }
    }

    #[test]
    fn test_memory_ceiling_evicts_large_entries() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(CachePolicy {
            max_memory_bytes: 1000,
            ..policy()
        });
        for key in 0..5 {
            cache.put(key, Blob(10));
        }
        cache.put(99, Blob(900));
        cache.put(100, Blob(200));
        cache.cleanup();

        assert!(cache.approx_bytes() <= 750);
        assert!(cache.get(&99).is_none());
        assert!(cache.stats().evictions >= 1);
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn test_write_after_interval_expires_in_background() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(CachePolicy {
            ttl: Duration::from_millis(20),
            cleanup_interval: Duration::from_millis(30),
            ..policy()
        });
        for key in 0..4 {
            cache.put(key, Blob(1));
        }
        std::thread::sleep(Duration::from_millis(60));

        // No explicit cleanup: the write itself schedules it
        cache.put(100, Blob(1));

        assert!(wait_until(|| cache.stats().expirations == 4));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&100).is_some());
    }

    #[test]
    fn test_write_over_ceiling_evicts_in_background() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(CachePolicy {
            max_entries: 4,
            ..policy()
        });
        for key in 0..4 {
            cache.put(key, Blob(1));
        }
        assert_eq!(cache.stats().evictions, 0);

        cache.put(4, Blob(1));

        assert!(wait_until(|| cache.len() <= 4));
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn test_retain_keys_counts_invalidations() {
        let cache: TtlCache<u32, Blob> = TtlCache::new(policy());
        for key in 0..6 {
            cache.put(key, Blob(1));
        }
        assert_eq!(cache.retain_keys(|k| k % 2 == 0), 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().invalidations, 3);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_some());
    }
}
