//! Deferred cleanup cache.
//!
//! Holds compiled patterns that were evicted from the pattern cache while a
//! caller still held a reference. Entries are destroyed as soon as their
//! refcount reaches zero, or forcibly once the safety horizon elapses.
//! Forced destruction only drops this cache's ownership share: the native
//! memory lingers until the leaking caller releases, which is exactly what
//! the emitted diagnostic points at. Volumes are low by construction, so a
//! single reader-writer-locked map suffices.

use crate::clock::now_ms;
use crate::metrics::{DeferredCacheCounters, DeferredCacheSnapshot};
use crate::pattern::CompiledPattern;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

struct DeferredEntry {
    pattern: Arc<CompiledPattern>,
    entered_at: u64,
    size_bytes: u64,
}

pub struct DeferredCache {
    entries: RwLock<HashMap<u64, DeferredEntry>>,
    counters: Arc<DeferredCacheCounters>,
    actual_bytes: AtomicU64,
    ttl_ms: u64,
}

impl DeferredCache {
    pub(crate) fn new(ttl_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            counters: Arc::new(DeferredCacheCounters::default()),
            actual_bytes: AtomicU64::new(0),
            ttl_ms,
        }
    }

    /// Park a still-referenced pattern, stamped with the current monotonic
    /// time. Idempotent: a key already present is left untouched.
    pub(crate) fn add(&self, key: u64, pattern: Arc<CompiledPattern>) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            warn!("deferred cache lock poisoned; recovering");
            poisoned.into_inner()
        });
        if let Entry::Vacant(slot) = entries.entry(key) {
            let size_bytes = pattern.size_bytes() as u64;
            debug!(
                pattern = pattern.pattern(),
                refcount = pattern.refcount(),
                size_bytes,
                "parking in-use pattern in deferred cache"
            );
            slot.insert(DeferredEntry { pattern, entered_at: now_ms(), size_bytes });
            self.counters.record_add();
            self.actual_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        }
    }

    /// Destroy entries whose refcount reached zero, and force-destroy those
    /// older than the safety horizon. Returns the number destroyed.
    pub fn evict(&self, now: u64) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            warn!("deferred cache lock poisoned; recovering");
            poisoned.into_inner()
        });
        let mut evicted = 0;
        entries.retain(|_key, entry| {
            if entry.pattern.refcount() == 0 {
                self.counters.record_immediate_eviction(entry.size_bytes);
                self.actual_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                evicted += 1;
                return false;
            }
            let age_ms = now.saturating_sub(entry.entered_at);
            if age_ms > self.ttl_ms {
                warn!(
                    pattern = entry.pattern.pattern(),
                    refcount = entry.pattern.refcount(),
                    age_ms,
                    size_bytes = entry.size_bytes,
                    "forced eviction of deferred pattern: a caller has held its \
                     reference past the safety horizon (possible leak)"
                );
                self.counters.record_forced_eviction(entry.size_bytes);
                self.actual_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                evicted += 1;
                return false;
            }
            true
        });
        evicted
    }

    /// Destroy all entries unconditionally.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            warn!("deferred cache lock poisoned; recovering");
            poisoned.into_inner()
        });
        for entry in entries.values() {
            self.actual_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot_metrics(&self) -> DeferredCacheSnapshot {
        self.counters
            .snapshot(self.actual_bytes.load(Ordering::Relaxed), self.len() as u64)
    }

    /// Human-readable listing of parked entries, for debugging.
    pub fn dump(&self) -> String {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = now_ms();
        let mut lines = Vec::with_capacity(entries.len() + 1);
        lines.push(format!("deferred cache: {} entries", entries.len()));
        for (key, entry) in entries.iter() {
            lines.push(format!(
                "  key={:#018x} pattern={:?} refcount={} age_ms={} size_bytes={}",
                key,
                entry.pattern.pattern(),
                entry.pattern.refcount(),
                now.saturating_sub(entry.entered_at),
                entry.size_bytes,
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PatternEngine, RegexEngine};
    use crate::hash::pattern_key;

    fn compiled(pattern: &str) -> Arc<CompiledPattern> {
        let program = RegexEngine.compile(pattern, true).unwrap();
        Arc::new(CompiledPattern::new(program, pattern.to_string(), true))
    }

    #[test]
    fn test_add_is_idempotent() {
        let cache = DeferredCache::new(10_000);
        let pattern = compiled("a+");
        let key = pattern_key("a+", true);
        cache.add(key, Arc::clone(&pattern));
        cache.add(key, Arc::clone(&pattern));
        assert_eq!(cache.len(), 1);
        let snapshot = cache.snapshot_metrics();
        assert_eq!(snapshot.total_entries_added, 1);
        assert_eq!(snapshot.capacity.actual_bytes, pattern.size_bytes() as u64);
    }

    #[test]
    fn test_immediate_eviction_at_zero_refcount() {
        let cache = DeferredCache::new(10_000);
        let pattern = compiled("a+");
        cache.add(1, Arc::clone(&pattern));
        assert_eq!(cache.evict(now_ms()), 1);
        assert!(cache.is_empty());
        let snapshot = cache.snapshot_metrics();
        assert_eq!(snapshot.evictions.immediate, 1);
        assert_eq!(snapshot.evictions.forced, 0);
        assert_eq!(snapshot.capacity.actual_bytes, 0);
    }

    #[test]
    fn test_in_use_entry_survives_until_ttl() {
        let cache = DeferredCache::new(1_000);
        let pattern = compiled("a+");
        pattern.acquire();
        cache.add(1, Arc::clone(&pattern));

        let now = now_ms();
        assert_eq!(cache.evict(now), 0);
        assert_eq!(cache.len(), 1);

        // past the safety horizon the entry is forced out despite the refcount
        assert_eq!(cache.evict(now + 1_001), 1);
        assert!(cache.is_empty());
        let snapshot = cache.snapshot_metrics();
        assert_eq!(snapshot.evictions.forced, 1);
        assert!(snapshot.evictions.forced_bytes_freed > 0);
        // the leaking holder still owns the pattern; memory was not destroyed
        assert_eq!(pattern.refcount(), 1);
    }

    #[test]
    fn test_clear_unconditional() {
        let cache = DeferredCache::new(10_000);
        let held = compiled("a+");
        held.acquire();
        cache.add(1, Arc::clone(&held));
        cache.add(2, compiled("b+"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.snapshot_metrics().capacity.actual_bytes, 0);
    }

    #[test]
    fn test_dump_lists_entries() {
        let cache = DeferredCache::new(10_000);
        let pattern = compiled("needle");
        pattern.acquire();
        cache.add(42, pattern);
        let dump = cache.dump();
        assert!(dump.contains("1 entries"));
        assert!(dump.contains("needle"));
        assert!(dump.contains("refcount=1"));
    }
}
