//! Content-addressed prompt cache using moka
//!
//! Maps request [`Fingerprint`]s to previously sampled output. Capacity is
//! bounded with least-recently-used eviction and every entry carries its own
//! expiry, checked again at read time against the tokio clock.

use crate::fingerprint::Fingerprint;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default maximum number of entries
pub const DEFAULT_CAPACITY: u64 = 1_024;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest lifetime an entry can be given; longer TTLs are clamped
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A cached sampler output
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Fingerprint of the request that produced the value
    pub fingerprint: Fingerprint,
    /// Cached sampler output
    pub value: Arc<str>,
    /// When the entry was written
    pub created_at: Instant,
    /// When the entry stops being visible
    pub expires_at: Instant,
    /// Lifetime the entry was stored with
    pub ttl: Duration,
}

impl CacheEntry {
    /// An entry is visible only while `now < expires_at`
    #[inline]
    #[must_use]
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Per-entry expiry policy for moka's background cleanup
///
/// Visibility is decided in [`PromptCache::get`]; this only lets moka
/// reclaim entries that nobody reads again.
struct EntryExpiry;

impl Expiry<Fingerprint, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Reads that returned a live entry
    pub hits: u64,
    /// Reads that found nothing, or only an expired entry
    pub misses: u64,
    /// Approximate number of entries in cache
    pub entry_count: u64,
    /// `hits / (hits + misses)`, or 0.0 before the first read
    pub hit_rate: f64,
}

/// Bounded, expiring prompt cache
///
/// The only state shared across lineages. Cloning is cheap and clones share
/// storage and counters; create one per process and drop it on shutdown.
#[derive(Debug, Clone)]
pub struct PromptCache {
    inner: Cache<Fingerprint, CacheEntry>,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl PromptCache {
    /// Create cache with max capacity and the default TTL
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self::with_ttl(max_capacity, DEFAULT_TTL)
    }

    /// Create cache with max capacity and a default time-to-live
    #[must_use]
    pub fn with_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .eviction_policy(EvictionPolicy::lru())
                .expire_after(EntryExpiry)
                .build(),
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a fingerprint
    ///
    /// Expiry is checked lazily here: an entry whose `expires_at` has passed
    /// is dropped and reported as a miss.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<str>> {
        let found = match self.inner.get(fingerprint).await {
            Some(entry) if entry.is_live_at(Instant::now()) => Some(entry.value),
            Some(_) => {
                self.inner.invalidate(fingerprint).await;
                None
            }
            None => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("glimpse_cache_hits_total").increment(1);
            tracing::debug!(fingerprint = %fingerprint.short(), "prompt cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("glimpse_cache_misses_total").increment(1);
            tracing::debug!(fingerprint = %fingerprint.short(), "prompt cache miss");
        }
        found
    }

    /// Store a value for `ttl`
    ///
    /// `ttl` is clamped to [`MAX_TTL`]. When capacity is exceeded the
    /// least-recently-used entry is evicted regardless of its remaining
    /// lifetime.
    pub async fn put(&self, fingerprint: Fingerprint, value: impl Into<Arc<str>>, ttl: Duration) {
        let created_at = Instant::now();
        let ttl = ttl.min(MAX_TTL);
        let Some(expires_at) = created_at.checked_add(ttl) else {
            tracing::warn!(fingerprint = %fingerprint.short(), ?ttl, "entry expiry out of range; not cached");
            return;
        };
        let entry = CacheEntry {
            fingerprint,
            value: value.into(),
            created_at,
            expires_at,
            ttl,
        };
        self.inner.insert(fingerprint, entry).await;
    }

    /// Store a value using the cache's default TTL
    #[inline]
    pub async fn put_default(&self, fingerprint: Fingerprint, value: impl Into<Arc<str>>) {
        self.put(fingerprint, value, self.default_ttl).await;
    }

    /// Invalidate cache entry
    #[inline]
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.invalidate(fingerprint).await;
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Flush pending maintenance (evictions, expirations)
    #[inline]
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Fraction of reads that were hits
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.inner.entry_count(),
            hit_rate: self.hit_rate(),
        }
    }

    /// Get approximate entry count
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// TTL applied by [`PromptCache::put_default`]
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(label: &str) -> Fingerprint {
        Fingerprint::compute(label.as_bytes())
    }

    #[tokio::test]
    async fn put_and_get() {
        let cache = PromptCache::new(16);
        cache.put(fp("a"), "sampled text", Duration::from_secs(60)).await;

        let value = cache.get(&fp("a")).await;
        assert_eq!(value.as_deref(), Some("sampled text"));
    }

    #[tokio::test]
    async fn missing_fingerprint_is_a_miss() {
        let cache = PromptCache::new(16);
        assert!(cache.get(&fp("missing")).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn hit_rate_tracks_reads() {
        let cache = PromptCache::new(16);
        assert_eq!(cache.hit_rate(), 0.0);

        cache.put_default(fp("a"), "x").await;
        let _ = cache.get(&fp("a")).await;
        let _ = cache.get(&fp("b")).await;
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);

        let _ = cache.get(&fp("a")).await;
        assert!(cache.hit_rate() > 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_not_served() {
        let cache = PromptCache::new(16);
        cache.put(fp("short"), "soon gone", Duration::from_millis(20)).await;
        assert!(cache.get(&fp("short")).await.is_some());

        tokio::time::advance(Duration::from_millis(19)).await;
        assert!(cache.get(&fp("short")).await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&fp("short")).await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = PromptCache::new(2);
        for label in ["a", "b", "c", "d"] {
            cache.put_default(fp(label), label).await;
            cache.run_pending_tasks().await;
        }

        assert!(cache.entry_count() <= 2);
        assert!(cache.get(&fp("d")).await.is_some());
    }

    #[tokio::test]
    async fn least_recently_read_entry_is_evicted_first() {
        let cache = PromptCache::new(2);
        cache.put_default(fp("old"), "old").await;
        cache.put_default(fp("young"), "young").await;
        cache.run_pending_tasks().await;

        // Reading "old" makes "young" the least recently used
        assert!(cache.get(&fp("old")).await.is_some());
        cache.run_pending_tasks().await;

        cache.put_default(fp("new"), "new").await;
        cache.run_pending_tasks().await;

        assert_eq!(cache.entry_count(), 2);
        assert!(cache.get(&fp("young")).await.is_none());
        assert!(cache.get(&fp("old")).await.is_some());
        assert!(cache.get(&fp("new")).await.is_some());
    }

    #[tokio::test]
    async fn oversized_ttl_is_clamped() {
        let cache = PromptCache::new(16);
        cache.put(fp("forever"), "kept", Duration::MAX).await;

        assert_eq!(cache.get(&fp("forever")).await.as_deref(), Some("kept"));
        let entry = cache.inner.get(&fp("forever")).await.unwrap();
        assert_eq!(entry.ttl, MAX_TTL);
        assert_eq!(entry.expires_at - entry.created_at, MAX_TTL);
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let cache = PromptCache::new(16);
        let clone = cache.clone();
        cache.put_default(fp("shared"), "v").await;

        assert!(clone.get(&fp("shared")).await.is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn invalidation() {
        let cache = PromptCache::default();
        cache.put_default(fp("a"), "x").await;
        cache.invalidate(&fp("a")).await;
        assert!(cache.get(&fp("a")).await.is_none());
    }

    #[test]
    fn entry_visibility_is_strictly_before_expiry() {
        let now = Instant::now();
        let entry = CacheEntry {
            fingerprint: fp("a"),
            value: Arc::from("x"),
            created_at: now,
            expires_at: now + Duration::from_secs(1),
            ttl: Duration::from_secs(1),
        };
        assert!(entry.is_live_at(now));
        assert!(!entry.is_live_at(entry.expires_at));
    }
}
