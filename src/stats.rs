//! Statistics tracking for the resolver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Atomic statistics for tracking resolver behaviour.
pub struct Stats {
    blocked: AtomicU64,
    allowed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
    started_at: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            blocked: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_blocked(&self, response_time_ms: f64) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        self.add_response_time(response_time_ms);
    }

    pub fn record_cached(&self, response_time_ms: f64) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.add_response_time(response_time_ms);
    }

    pub fn record_forwarded(&self, response_time_ms: f64) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.add_response_time(response_time_ms);
    }

    /// A cache miss whose upstream race produced no answer.
    pub fn record_failed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_response_time(&self, response_time_ms: f64) {
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let blocked = self.blocked.swap(0, Ordering::Relaxed);
        let allowed = self.allowed.swap(0, Ordering::Relaxed);
        let cache_hits = self.cache_hits.swap(0, Ordering::Relaxed);
        let cache_misses = self.cache_misses.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let malformed = self.malformed.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let answered = blocked + cache_hits + forwarded;
        let avg_response_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            total: blocked + allowed,
            blocked,
            cache_hits,
            cache_misses,
            forwarded,
            failed,
            malformed,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub total: u64,
    pub blocked: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub forwarded: u64,
    pub failed: u64,
    pub malformed: u64,
    pub avg_response_ms: f64,
}

impl StatsSnapshot {
    /// Percentage of queries that were blocked.
    pub fn block_rate(&self) -> f64 {
        percent(self.blocked, self.total)
    }

    /// Percentage of allowed queries answered from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        percent(self.cache_hits, self.cache_hits + self.cache_misses)
    }

    pub fn log(&self, cache_len: usize) {
        info!(
            uptime_secs = self.uptime_secs,
            total = self.total,
            blocked = self.blocked,
            block_rate = format_args!("{:.1}%", self.block_rate()),
            cache_hit_rate = format_args!("{:.1}%", self.cache_hit_rate()),
            forwarded = self.forwarded,
            failed = self.failed,
            malformed = self.malformed,
            cache = cache_len,
            avg_response_ms = format_args!("{:.2}", self.avg_response_ms),
            "stats"
        );
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_and_rates() {
        let stats = Stats::new();
        stats.record_blocked(1.0);
        stats.record_cached(1.0);
        stats.record_cached(1.0);
        stats.record_cached(1.0);
        stats.record_forwarded(5.0);
        stats.record_failed();
        stats.record_malformed();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.total, 6);
        assert_eq!(snapshot.blocked, 1);
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.malformed, 1);
        assert!((snapshot.block_rate() - 100.0 / 6.0).abs() < 1e-9);
        assert!((snapshot.cache_hit_rate() - 60.0).abs() < 1e-9);
        assert!((snapshot.avg_response_ms - 9.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record_blocked(1.0);
        stats.snapshot_and_reset();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.block_rate(), 0.0);
        assert_eq!(snapshot.cache_hit_rate(), 0.0);
        assert_eq!(snapshot.avg_response_ms, 0.0);
    }
}
