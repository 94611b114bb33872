//! Cache effectiveness accounting
//!
//! Raw counters are append-only atomics so any number of cache call sites
//! can report concurrently. Derived values are computed on every
//! [`CacheStatisticsAggregator::snapshot`] and never stored.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Derived cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_items: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub total_requests: u64,
    /// hit_count / total_requests, 0.0 when there were no requests
    pub hit_rate: f64,
    /// Items past their TTL that have not been evicted yet
    pub expired_items: u64,
}

/// Instrumentation callbacks a cache implementation reports through
pub trait CacheObserver: Send + Sync {
    fn on_hit(&self);
    fn on_miss(&self);
    fn on_insert(&self);
    /// A resident entry was observed past its TTL (reported once per entry)
    fn on_expiry(&self);
    /// A resident entry left the cache; `expired` is true when it had been
    /// reported through `on_expiry` before
    fn on_eviction(&self, expired: bool);
}

/// Aggregates raw hit/miss/expiry/eviction counters into [`CacheStatistics`]
#[derive(Debug, Default)]
pub struct CacheStatisticsAggregator {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    expiries: AtomicU64,
    evictions: AtomicU64,
    expired_evictions: AtomicU64,
}

impl CacheStatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiry(&self) {
        self.expiries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction when the caller does not know whether the entry
    /// was expired. Outstanding expired items are retired first, matching
    /// TTL sweeps which evict expired entries before live ones.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        let expiries = self.expiries.load(Ordering::Relaxed);
        let _ = self
            .expired_evictions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |retired| {
                (retired < expiries).then_some(retired + 1)
            });
    }

    /// Record an eviction whose expiry state is known
    pub fn record_eviction_of(&self, expired: bool) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if expired {
            self.expired_evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Compute derived statistics from the current counters. Pure read.
    pub fn snapshot(&self) -> CacheStatistics {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let inserts = self.inserts.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);
        let expiries = self.expiries.load(Ordering::Relaxed);
        let expired_evictions = self.expired_evictions.load(Ordering::Relaxed);

        let total_requests = hit_count + miss_count;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hit_count as f64 / total_requests as f64
        };

        let total_items = inserts.saturating_sub(evictions);
        let expired_items = expiries.saturating_sub(expired_evictions).min(total_items);

        CacheStatistics {
            total_items,
            hit_count,
            miss_count,
            total_requests,
            hit_rate,
            expired_items,
        }
    }
}

impl CacheObserver for CacheStatisticsAggregator {
    fn on_hit(&self) {
        self.record_hit();
    }

    fn on_miss(&self) {
        self.record_miss();
    }

    fn on_insert(&self) {
        self.record_insert();
    }

    fn on_expiry(&self) {
        self.record_expiry();
    }

    fn on_eviction(&self, expired: bool) {
        self.record_eviction_of(expired);
    }
}
