//! Pattern compilation cache.
//!
//! The authoritative map from pattern key to compiled pattern, with
//! refcounted sharing and a soft byte budget. The one invariant everything
//! here is built around: a hit's refcount increment happens while the
//! lookup guard is still held. Releasing the guard first would open a
//! window for the eviction thread to observe refcount zero and destroy the
//! entry out from under the caller.

use crate::cache::deferred_cache::DeferredCache;
use crate::cache::store::Store;
use crate::clock::now_ms;
use crate::config::CacheConfig;
use crate::engine::PatternEngine;
use crate::error::{CacheError, Result};
use crate::hash::pattern_key;
use crate::metrics::{CapacityStats, PatternCacheCounters, PatternCacheSnapshot};
use crate::pattern::{CompiledPattern, PatternRef};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct PatternEntry {
    pattern: Arc<CompiledPattern>,
    last_access: AtomicU64,
}

impl PatternEntry {
    fn new(pattern: Arc<CompiledPattern>, now: u64) -> Self {
        Self { pattern, last_access: AtomicU64::new(now) }
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

pub struct PatternCache {
    store: Store<PatternEntry>,
    engine: Arc<dyn PatternEngine>,
    counters: Arc<PatternCacheCounters>,
    actual_bytes: AtomicU64,
    target_bytes: u64,
    ttl_ms: u64,
    lru_batch_size: usize,
    caching_enabled: bool,
}

impl PatternCache {
    pub(crate) fn new(config: &CacheConfig, engine: Arc<dyn PatternEngine>) -> Self {
        Self {
            store: Store::new(config.pattern_cache_use_tbb),
            engine,
            counters: Arc::new(PatternCacheCounters::default()),
            actual_bytes: AtomicU64::new(0),
            target_bytes: config.pattern_cache_target_capacity_bytes,
            ttl_ms: config.pattern_cache_ttl(),
            lru_batch_size: config.pattern_cache_lru_batch_size as usize,
            caching_enabled: config.cache_enabled,
        }
    }

    /// Look up or compile a pattern, returning a reference that counts
    /// toward its liveness until released.
    ///
    /// On a hit the refcount is incremented and the last-access timestamp
    /// refreshed before the lookup guard drops. On a miss the compilation
    /// runs with no lock held; insertion double-checks for a racing winner
    /// and discards the loser's artifact.
    pub fn get_or_compile(&self, pattern: &str, case_sensitive: bool) -> Result<PatternRef> {
        if pattern.is_empty() {
            return Err(CacheError::EmptyPattern);
        }
        if !self.caching_enabled {
            // pass-through mode: compile every call, never cache
            let compiled = self.compile(pattern, case_sensitive)?;
            compiled.acquire();
            return Ok(PatternRef::new(compiled, Arc::clone(&self.counters)));
        }

        let key = pattern_key(pattern, case_sensitive);
        if let Some(found) = self.store.get_and(key, |entry| {
            entry.pattern.acquire();
            entry.touch(now_ms());
            Arc::clone(&entry.pattern)
        }) {
            self.counters.record_hit();
            return Ok(PatternRef::new(found, Arc::clone(&self.counters)));
        }

        self.counters.record_miss();
        let compiled = self.compile(pattern, case_sensitive)?;

        // The caller's reference is taken before the entry becomes visible,
        // so the LRU pass can never observe this entry at refcount zero
        // between insert and return.
        compiled.acquire();
        let entry = PatternEntry::new(Arc::clone(&compiled), now_ms());
        match self.store.insert_or_get(key, entry, |existing| {
            existing.pattern.acquire();
            existing.touch(now_ms());
            Arc::clone(&existing.pattern)
        }) {
            Some(winner) => {
                // lost the insert race: our artifact is dropped here
                debug!(pattern, "discarding duplicate compilation after insert race");
                Ok(PatternRef::new(winner, Arc::clone(&self.counters)))
            }
            None => {
                self.actual_bytes
                    .fetch_add(compiled.size_bytes() as u64, Ordering::Relaxed);
                Ok(PatternRef::new(compiled, Arc::clone(&self.counters)))
            }
        }
    }

    fn compile(&self, pattern: &str, case_sensitive: bool) -> Result<Arc<CompiledPattern>> {
        match self.engine.compile(pattern, case_sensitive) {
            Ok(program) => Ok(Arc::new(CompiledPattern::new(
                program,
                pattern.to_string(),
                case_sensitive,
            ))),
            Err(e) => {
                self.counters.record_compilation_error();
                Err(CacheError::compilation(e.to_string()))
            }
        }
    }

    /// Release a caller's reference. Provided for symmetry; dropping the
    /// reference has the same effect.
    pub fn release(reference: PatternRef) {
        reference.release();
    }

    /// Compile a batch of patterns so later lookups hit.
    pub fn preload(&self, patterns: &[&str], case_sensitive: bool) -> Result<()> {
        for pattern in patterns {
            self.get_or_compile(pattern, case_sensitive)?;
        }
        Ok(())
    }

    /// Two-pass sweep invoked by the eviction thread. Pass 1 removes
    /// idle-expired entries, destroying unreferenced ones and migrating
    /// in-use ones to the deferred cache. Pass 2 evicts least-recently-used
    /// unreferenced entries in batches while over the byte budget; in-use
    /// entries are never chosen, so the budget is soft.
    pub fn evict(&self, deferred: &DeferredCache, now: u64) -> u64 {
        let mut removed = 0;

        // Pass 1: TTL
        let mut expired = Vec::new();
        self.store.for_each(|key, entry| {
            if entry.idle_ms(now) > self.ttl_ms {
                expired.push(key);
            }
        });
        for key in expired {
            // re-checked under the write guard: the entry may have been
            // touched since the scan
            let Some(entry) = self.store.remove_if(key, |e| e.idle_ms(now) > self.ttl_ms) else {
                continue;
            };
            let size = entry.pattern.size_bytes() as u64;
            self.actual_bytes.fetch_sub(size, Ordering::Relaxed);
            removed += 1;
            if entry.pattern.refcount() == 0 {
                debug!(pattern = entry.pattern.pattern(), size, "ttl eviction");
                self.counters.record_ttl_eviction(size);
            } else {
                self.counters.record_ttl_migration();
                deferred.add(key, Arc::clone(&entry.pattern));
            }
        }

        // Pass 2: LRU, batched
        while self.actual_bytes.load(Ordering::Relaxed) > self.target_bytes {
            let mut candidates: Vec<(u64, u64)> = Vec::new();
            self.store.for_each(|key, entry| {
                if entry.pattern.refcount() == 0 {
                    candidates.push((key, entry.last_access()));
                }
            });
            if candidates.is_empty() {
                // nothing evictable: give up even though over budget
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
                // a caller may have re-acquired since the scan; skip those
                if let Some(entry) = self.store.remove_if(key, |e| e.pattern.refcount() == 0) {
                    let size = entry.pattern.size_bytes() as u64;
                    self.actual_bytes.fetch_sub(size, Ordering::Relaxed);
                    self.counters.record_lru_eviction(size);
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

    /// Empty the cache: in-use entries migrate to the deferred cache so
    /// they still get a cleanup chance, unreferenced entries are destroyed.
    pub fn clear(&self, deferred: &DeferredCache) {
        for (key, entry) in self.store.drain() {
            self.actual_bytes
                .fetch_sub(entry.pattern.size_bytes() as u64, Ordering::Relaxed);
            if entry.pattern.refcount() > 0 {
                deferred.add(key, Arc::clone(&entry.pattern));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    pub fn snapshot_metrics(&self) -> PatternCacheSnapshot {
        let capacity = CapacityStats::new(
            self.target_bytes,
            self.actual_bytes.load(Ordering::Relaxed),
            self.store.len() as u64,
        );
        self.counters.snapshot(capacity, self.store.is_sharded())
    }
}
