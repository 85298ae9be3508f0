//! DNS response cache with TTL expiry, a grace window for stale answers and
//! popularity-weighted eviction.
//!
//! An entry is fresh until its TTL runs out, stale for the grace period after
//! that (still served, but flagged for refresh), then expired and removed on
//! the next lookup or [`DnsCache::clean`] pass.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::trace;

/// Tunables for [`DnsCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept at once.
    pub max_size: usize,
    /// How long an entry past its TTL is still served.
    pub grace_period: Duration,
    /// Accesses needed before an entry is refreshed ahead of expiry.
    pub popularity_threshold: u64,
    /// Fraction of the TTL after which a popular entry is refreshed.
    pub prefetch_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1024,
            grace_period: Duration::from_secs(5 * 60),
            popularity_threshold: 5,
            prefetch_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Stale,
    Expired,
}

/// Result of a cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response: Vec<u8>,
    /// The entry is stale or popular and close to expiry; the caller should
    /// refresh it in the background.
    pub needs_refresh: bool,
}

struct CacheEntry {
    response: Vec<u8>,
    created_at: Instant,
    expires_at: Instant,
    original_ttl: u32,
    popularity: AtomicU64,
    /// Milliseconds after `created_at` of the latest access.
    last_access_ms: AtomicU64,
}

impl CacheEntry {
    fn new(response: Vec<u8>, ttl: u32, now: Instant) -> Self {
        Self {
            response,
            created_at: now,
            expires_at: now + Duration::from_secs(u64::from(ttl)),
            original_ttl: ttl,
            popularity: AtomicU64::new(1),
            last_access_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self, now: Instant) {
        self.popularity.fetch_add(1, Ordering::Relaxed);
        let offset = now.saturating_duration_since(self.created_at).as_millis() as u64;
        self.last_access_ms.fetch_max(offset, Ordering::Relaxed);
    }

    fn state(&self, now: Instant, grace: Duration) -> EntryState {
        if now <= self.expires_at {
            EntryState::Fresh
        } else if now <= self.expires_at + grace {
            EntryState::Stale
        } else {
            EntryState::Expired
        }
    }

    fn should_prefetch(&self, now: Instant, config: &CacheConfig) -> bool {
        if self.popularity.load(Ordering::Relaxed) < config.popularity_threshold {
            return false;
        }
        let age = now.saturating_duration_since(self.created_at);
        let ttl = Duration::from_secs(u64::from(self.original_ttl));
        age >= ttl.mul_f64(config.prefetch_ratio)
    }

    fn idle(&self, now: Instant) -> Duration {
        let last_access =
            self.created_at + Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last_access)
    }

    /// Higher means a better eviction candidate.
    fn eviction_score(&self, now: Instant) -> f64 {
        let popularity = self.popularity.load(Ordering::Relaxed) as f64;
        self.idle(now).as_secs_f64() / (popularity + 1.0)
    }
}

/// Bounded, TTL-aware DNS cache keyed by `"<domain>:<qtype>"`.
///
/// Popularity never decays; it only resets when a key is overwritten.
pub struct DnsCache {
    entries: RwLock<FxHashMap<String, Arc<CacheEntry>>>,
    config: CacheConfig,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(mut config: CacheConfig) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            entries: RwLock::new(FxHashMap::with_capacity_and_hasher(
                config.max_size,
                Default::default(),
            )),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a cached response.
    ///
    /// Every hit counts towards popularity, even one that turns out to be
    /// expired. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<CachedResponse> {
        let entry = {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            Arc::clone(entries.get(key)?)
        };

        entry.touch(now);

        let needs_refresh = match entry.state(now, self.config.grace_period) {
            EntryState::Expired => {
                self.remove_if_same(key, &entry);
                return None;
            }
            EntryState::Stale => true,
            EntryState::Fresh => entry.should_prefetch(now, &self.config),
        };

        Some(CachedResponse {
            response: entry.response.clone(),
            needs_refresh,
        })
    }

    /// Remove `key` unless it was overwritten since `seen` was read.
    fn remove_if_same(&self, key: &str, seen: &Arc<CacheEntry>) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, seen))
        {
            entries.remove(key);
        }
    }

    /// Store a response, replacing any previous entry for `key`.
    ///
    /// When the cache is full and `key` is new, exactly one entry is evicted
    /// first.
    pub fn set(&self, key: &str, response: Vec<u8>, ttl: u32) {
        self.set_at(key, response, ttl, Instant::now());
    }

    fn set_at(&self, key: &str, response: Vec<u8>, ttl: u32, now: Instant) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if entries.len() >= self.config.max_size && !entries.contains_key(key) {
            Self::evict_one(&mut entries, now);
        }

        entries.insert(key.to_string(), Arc::new(CacheEntry::new(response, ttl, now)));
    }

    /// Remove every entry past its TTL and grace period. Returns the number
    /// of entries removed.
    pub fn clean(&self) -> usize {
        self.clean_at(Instant::now())
    }

    fn clean_at(&self, now: Instant) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let grace = self.config.grace_period;
        entries.retain(|_, entry| entry.state(now, grace) != EntryState::Expired);
        before - entries.len()
    }

    /// Evict the entry idle the longest relative to its popularity.
    fn evict_one(entries: &mut FxHashMap<String, Arc<CacheEntry>>, now: Instant) {
        let worst = entries
            .iter()
            .map(|(key, entry)| (key, entry.eviction_score(now)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, _)| key.clone());

        if let Some(key) = worst {
            trace!(key = %key, "evicting cache entry");
            entries.remove(&key);
        }
    }

    /// Whether `key` is present, without counting as an access.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}
