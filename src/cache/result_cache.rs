//! Match-result cache.
//!
//! Remembers boolean match outcomes keyed by the combined hash of pattern
//! and input. The input itself is never stored, so every entry accounts for
//! the same fixed cost regardless of input length. Anything that goes wrong
//! inside `get`/`put` is absorbed: the operation degrades to a miss or a
//! skipped write and an error counter moves, never the caller's control
//! flow.

use crate::cache::store::Store;
use crate::clock::now_ms;
use crate::config::CacheConfig;
use crate::hash::{hash64, result_key};
use crate::metrics::{CapacityStats, ResultCacheCounters, ResultCacheSnapshot, RESULT_ENTRY_SIZE};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub(crate) struct ResultEntry {
    result: AtomicBool,
    last_access: AtomicU64,
}

impl ResultEntry {
    fn new(result: bool, now: u64) -> Self {
        Self {
            result: AtomicBool::new(result),
            last_access: AtomicU64::new(now),
        }
    }

    #[inline]
    fn touch(&self, now: u64) {
        self.last_access.store(now, Ordering::Relaxed);
    }

    #[inline]
    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_access())
    }
}

pub struct ResultCache {
    store: Store<ResultEntry>,
    counters: Arc<ResultCacheCounters>,
    actual_bytes: AtomicU64,
    target_bytes: u64,
    ttl_ms: u64,
    string_threshold_bytes: u64,
    lru_batch_size: usize,
    enabled: bool,
}

impl ResultCache {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            store: Store::new(config.pattern_result_cache_use_tbb),
            counters: Arc::new(ResultCacheCounters::default()),
            actual_bytes: AtomicU64::new(0),
            target_bytes: config.pattern_result_cache_target_capacity_bytes,
            ttl_ms: config.result_cache_ttl(),
            string_threshold_bytes: config.pattern_result_cache_string_threshold_bytes,
            lru_batch_size: config.pattern_cache_lru_batch_size as usize,
            enabled: config.result_cache_active(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached outcome for (pattern, input), or `None` on a miss. Refreshes
    /// the entry's last-access time on a hit.
    pub fn get(&self, pattern_hash: u64, input: &[u8]) -> Option<bool> {
        if !self.enabled {
            return None;
        }
        let lookup = catch_unwind(AssertUnwindSafe(|| {
            let key = result_key(pattern_hash, hash64(input, 0));
            self.store.get_and(key, |entry| {
                entry.touch(now_ms());
                entry.result.load(Ordering::Acquire)
            })
        }));
        match lookup {
            Ok(Some(result)) => {
                self.counters.record_hit();
                Some(result)
            }
            Ok(None) => {
                self.counters.record_miss();
                None
            }
            Err(_) => {
                warn!("result cache get failed; treating as miss");
                self.counters.record_get_error();
                None
            }
        }
    }

    /// Record a match outcome. Inputs over the size threshold are silently
    /// skipped: large inputs rarely recur verbatim and would pollute the
    /// key space.
    pub fn put(&self, pattern_hash: u64, input: &[u8], result: bool) {
        if !self.enabled {
            return;
        }
        if input.len() as u64 > self.string_threshold_bytes {
            return;
        }
        let write = catch_unwind(AssertUnwindSafe(|| {
            let key = result_key(pattern_hash, hash64(input, 0));
            let now = now_ms();
            let update = |entry: &ResultEntry| {
                entry.touch(now);
                entry.result.swap(result, Ordering::AcqRel)
            };
            match self.store.get_and(key, update) {
                Some(old) => Some(old),
                None => self.store.insert_or_get(key, ResultEntry::new(result, now), update),
            }
        }));
        match write {
            Ok(Some(old)) => self.counters.record_update(old != result),
            Ok(None) => {
                self.counters.record_insert();
                self.actual_bytes.fetch_add(RESULT_ENTRY_SIZE, Ordering::Relaxed);
            }
            Err(_) => {
                warn!("result cache put failed; skipping write");
                self.counters.record_put_error();
            }
        }
    }

    /// Two-pass sweep: TTL expiry, then batched LRU while over the byte
    /// budget. All entries are freely evictable.
    pub fn evict(&self, now: u64) -> u64 {
        if !self.enabled {
            return 0;
        }
        let mut removed = 0;

        let mut expired = Vec::new();
        self.store.for_each(|key, entry| {
            if entry.idle_ms(now) > self.ttl_ms {
                expired.push(key);
            }
        });
        for key in expired {
            if self
                .store
                .remove_if(key, |entry| entry.idle_ms(now) > self.ttl_ms)
                .is_some()
            {
                self.actual_bytes.fetch_sub(RESULT_ENTRY_SIZE, Ordering::Relaxed);
                self.counters.record_ttl_eviction(RESULT_ENTRY_SIZE);
                removed += 1;
            }
        }

        while self.actual_bytes.load(Ordering::Relaxed) > self.target_bytes {
            let mut candidates: Vec<(u64, u64)> = Vec::new();
            self.store.for_each(|key, entry| candidates.push((key, entry.last_access())));
            if candidates.is_empty() {
                break;
            }
            if candidates.len() > self.lru_batch_size {
                candidates.select_nth_unstable_by_key(self.lru_batch_size - 1, |&(_, at)| at);
                candidates.truncate(self.lru_batch_size);
            }
            candidates.sort_unstable_by_key(|&(_, at)| at);

            let mut evicted_any = false;
            for (key, _) in candidates {
                if self.actual_bytes.load(Ordering::Relaxed) <= self.target_bytes {
                    break;
                }
                if self.store.remove_if(key, |_| true).is_some() {
                    self.actual_bytes.fetch_sub(RESULT_ENTRY_SIZE, Ordering::Relaxed);
                    self.counters.record_lru_eviction(RESULT_ENTRY_SIZE);
                    removed += 1;
                    evicted_any = true;
                }
            }
            if !evicted_any {
                break;
            }
        }

        removed
    }

    pub fn clear(&self) {
        let drained = self.store.drain();
        self.actual_bytes
            .fetch_sub(drained.len() as u64 * RESULT_ENTRY_SIZE, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    pub fn snapshot_metrics(&self) -> ResultCacheSnapshot {
        let capacity = CapacityStats::new(
            self.target_bytes,
            self.actual_bytes.load(Ordering::Relaxed),
            self.store.len() as u64,
        );
        self.counters.snapshot(capacity, self.store.is_sharded())
    }
}
