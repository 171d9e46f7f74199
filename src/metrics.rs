//! Cache metrics: atomic counters, snapshots, and the JSON report.
//!
//! Each cache owns a counter block of relaxed `AtomicU64`s that any thread
//! may bump. Snapshots are plain serializable structs assembled on demand:
//! the eviction thread refreshes one per sweep, and the manager builds a
//! fresh caller-local one for JSON export so readers never race a writer on
//! snapshot fields.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Accounted size of one result-cache entry: struct fields plus hash-table
/// overhead. Independent of input length because inputs are never stored.
pub const RESULT_ENTRY_SIZE: u64 = 64;

/// Hit rate as a percentage, guarding the zero denominator.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        100.0 * hits as f64 / total as f64
    }
}

fn utilization_ratio(actual: u64, target: u64) -> f64 {
    if target == 0 {
        0.0
    } else {
        actual as f64 / target as f64
    }
}

/// ISO 8601 UTC timestamp for `generated_at`.
pub(crate) fn generated_at_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Counter blocks
// ---------------------------------------------------------------------------

/// Atomic counters for the pattern (compilation) cache.
#[derive(Debug, Default)]
pub struct PatternCacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub compilation_errors: AtomicU64,
    pub pattern_releases: AtomicU64,
    pub patterns_released_to_zero: AtomicU64,
    pub ttl_evictions: AtomicU64,
    pub lru_evictions: AtomicU64,
    pub ttl_moved_to_deferred: AtomicU64,
    pub lru_moved_to_deferred: AtomicU64,
    pub total_evictions: AtomicU64,
    pub total_bytes_freed: AtomicU64,
}

impl PatternCacheCounters {
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_compilation_error(&self) {
        self.compilation_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release(&self, released_to_zero: bool) {
        self.pattern_releases.fetch_add(1, Ordering::Relaxed);
        if released_to_zero {
            self.patterns_released_to_zero.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ttl_eviction(&self, bytes_freed: u64) {
        self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn record_lru_eviction(&self, bytes_freed: u64) {
        self.lru_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ttl_migration(&self) {
        self.ttl_moved_to_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, capacity: CapacityStats, using_tbb: bool) -> PatternCacheSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        PatternCacheSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            compilation_errors: self.compilation_errors.load(Ordering::Relaxed),
            pattern_releases: self.pattern_releases.load(Ordering::Relaxed),
            patterns_released_to_zero: self.patterns_released_to_zero.load(Ordering::Relaxed),
            evictions: PatternEvictionStats {
                ttl: self.ttl_evictions.load(Ordering::Relaxed),
                lru: self.lru_evictions.load(Ordering::Relaxed),
                ttl_moved_to_deferred: self.ttl_moved_to_deferred.load(Ordering::Relaxed),
                lru_moved_to_deferred: self.lru_moved_to_deferred.load(Ordering::Relaxed),
                total_evictions: self.total_evictions.load(Ordering::Relaxed),
                total_bytes_freed: self.total_bytes_freed.load(Ordering::Relaxed),
            },
            capacity,
            using_tbb,
        }
    }
}

/// Atomic counters for the result cache.
#[derive(Debug, Default)]
pub struct ResultCacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
    pub result_flips: AtomicU64,
    pub get_errors: AtomicU64,
    pub put_errors: AtomicU64,
    pub ttl_evictions: AtomicU64,
    pub lru_evictions: AtomicU64,
    pub lru_bytes_freed: AtomicU64,
    pub total_evictions: AtomicU64,
    pub total_bytes_freed: AtomicU64,
}

impl ResultCacheCounters {
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// `result_flips` is advisory: it counts updates whose new boolean
    /// differs from the stored one.
    #[inline]
    pub fn record_update(&self, flipped: bool) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if flipped {
            self.result_flips.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_get_error(&self) {
        self.get_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_put_error(&self) {
        self.put_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ttl_eviction(&self, bytes_freed: u64) {
        self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn record_lru_eviction(&self, bytes_freed: u64) {
        self.lru_evictions.fetch_add(1, Ordering::Relaxed);
        self.lru_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn snapshot(&self, capacity: CapacityStats, using_tbb: bool) -> ResultCacheSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        ResultCacheSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            result_flips: self.result_flips.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
            evictions: ResultEvictionStats {
                ttl: self.ttl_evictions.load(Ordering::Relaxed),
                lru: self.lru_evictions.load(Ordering::Relaxed),
                lru_bytes_freed: self.lru_bytes_freed.load(Ordering::Relaxed),
                total_evictions: self.total_evictions.load(Ordering::Relaxed),
                total_bytes_freed: self.total_bytes_freed.load(Ordering::Relaxed),
            },
            capacity,
            using_tbb,
        }
    }
}

/// Atomic counters for the deferred cleanup cache.
#[derive(Debug, Default)]
pub struct DeferredCacheCounters {
    pub total_entries_added: AtomicU64,
    pub immediate_evictions: AtomicU64,
    pub immediate_bytes_freed: AtomicU64,
    pub forced_evictions: AtomicU64,
    pub forced_bytes_freed: AtomicU64,
    pub total_evictions: AtomicU64,
    pub total_bytes_freed: AtomicU64,
}

impl DeferredCacheCounters {
    #[inline]
    pub fn record_add(&self) {
        self.total_entries_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_immediate_eviction(&self, bytes_freed: u64) {
        self.immediate_evictions.fetch_add(1, Ordering::Relaxed);
        self.immediate_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn record_forced_eviction(&self, bytes_freed: u64) {
        self.forced_evictions.fetch_add(1, Ordering::Relaxed);
        self.forced_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
        self.total_evictions.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn snapshot(&self, actual_bytes: u64, entry_count: u64) -> DeferredCacheSnapshot {
        DeferredCacheSnapshot {
            total_entries_added: self.total_entries_added.load(Ordering::Relaxed),
            evictions: DeferredEvictionStats {
                immediate: self.immediate_evictions.load(Ordering::Relaxed),
                immediate_bytes_freed: self.immediate_bytes_freed.load(Ordering::Relaxed),
                forced: self.forced_evictions.load(Ordering::Relaxed),
                forced_bytes_freed: self.forced_bytes_freed.load(Ordering::Relaxed),
                total_evictions: self.total_evictions.load(Ordering::Relaxed),
                total_bytes_freed: self.total_bytes_freed.load(Ordering::Relaxed),
            },
            capacity: DeferredCapacityStats { actual_bytes, entry_count },
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot documents
// ---------------------------------------------------------------------------

/// Capacity block shared by the pattern and result caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityStats {
    pub target_bytes: u64,
    pub actual_bytes: u64,
    pub entry_count: u64,
    pub utilization_ratio: f64,
}

impl CapacityStats {
    pub fn new(target_bytes: u64, actual_bytes: u64, entry_count: u64) -> Self {
        Self {
            target_bytes,
            actual_bytes,
            entry_count,
            utilization_ratio: utilization_ratio(actual_bytes, target_bytes),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferredCapacityStats {
    pub actual_bytes: u64,
    pub entry_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEvictionStats {
    pub ttl: u64,
    pub lru: u64,
    pub lru_bytes_freed: u64,
    pub total_evictions: u64,
    pub total_bytes_freed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternEvictionStats {
    pub ttl: u64,
    pub lru: u64,
    pub ttl_moved_to_deferred: u64,
    pub lru_moved_to_deferred: u64,
    pub total_evictions: u64,
    pub total_bytes_freed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferredEvictionStats {
    pub immediate: u64,
    pub immediate_bytes_freed: u64,
    pub forced: u64,
    pub forced_bytes_freed: u64,
    pub total_evictions: u64,
    pub total_bytes_freed: u64,
}

/// Point-in-time view of the result cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultCacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub inserts: u64,
    pub updates: u64,
    pub result_flips: u64,
    pub get_errors: u64,
    pub put_errors: u64,
    pub evictions: ResultEvictionStats,
    pub capacity: CapacityStats,
    pub using_tbb: bool,
}

impl ResultCacheSnapshot {
    pub fn report(&self) -> String {
        format!(
            "Result Cache:\n\
             - Requests: {} (hit rate {:.1}%)\n\
             - Inserts: {}, updates: {} (flips: {})\n\
             - Evictions: {} ttl, {} lru ({} bytes freed total)\n\
             - Entries: {} ({}/{} bytes, {:.1}% utilization)",
            self.hits + self.misses,
            self.hit_rate,
            self.inserts,
            self.updates,
            self.result_flips,
            self.evictions.ttl,
            self.evictions.lru,
            self.evictions.total_bytes_freed,
            self.capacity.entry_count,
            self.capacity.actual_bytes,
            self.capacity.target_bytes,
            self.capacity.utilization_ratio * 100.0,
        )
    }
}

/// Point-in-time view of the pattern cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternCacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub compilation_errors: u64,
    pub pattern_releases: u64,
    pub patterns_released_to_zero: u64,
    pub evictions: PatternEvictionStats,
    pub capacity: CapacityStats,
    pub using_tbb: bool,
}

impl PatternCacheSnapshot {
    pub fn report(&self) -> String {
        format!(
            "Pattern Cache:\n\
             - Requests: {} (hit rate {:.1}%), compilation errors: {}\n\
             - Releases: {} ({} to zero)\n\
             - Evictions: {} ttl, {} lru, {} moved to deferred ({} bytes freed)\n\
             - Entries: {} ({}/{} bytes, {:.1}% utilization)",
            self.hits + self.misses,
            self.hit_rate,
            self.compilation_errors,
            self.pattern_releases,
            self.patterns_released_to_zero,
            self.evictions.ttl,
            self.evictions.lru,
            self.evictions.ttl_moved_to_deferred + self.evictions.lru_moved_to_deferred,
            self.evictions.total_bytes_freed,
            self.capacity.entry_count,
            self.capacity.actual_bytes,
            self.capacity.target_bytes,
            self.capacity.utilization_ratio * 100.0,
        )
    }
}

/// Point-in-time view of the deferred cleanup cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferredCacheSnapshot {
    pub total_entries_added: u64,
    pub evictions: DeferredEvictionStats,
    pub capacity: DeferredCapacityStats,
}

impl DeferredCacheSnapshot {
    pub fn report(&self) -> String {
        format!(
            "Deferred Cache:\n\
             - Entries added: {}\n\
             - Evictions: {} immediate ({} bytes), {} forced ({} bytes)\n\
             - Parked: {} entries ({} bytes)",
            self.total_entries_added,
            self.evictions.immediate,
            self.evictions.immediate_bytes_freed,
            self.evictions.forced,
            self.evictions.forced_bytes_freed,
            self.capacity.entry_count,
            self.capacity.actual_bytes,
        )
    }
}

/// The full metrics document, serialized for `get_metrics_json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheReport {
    pub pattern_result_cache: ResultCacheSnapshot,
    pub pattern_cache: PatternCacheSnapshot,
    pub deferred_cache: DeferredCacheSnapshot,
    pub generated_at: String,
}
