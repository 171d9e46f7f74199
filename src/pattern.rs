//! Compiled patterns and caller-held references.
//!
//! A [`CompiledPattern`] pairs the engine's program with an atomic refcount
//! of live caller references. Shared ownership (`Arc`) decides when the
//! program's memory is actually released; the refcount is the operational
//! liveness signal the eviction path reads without taking ownership itself.
//! The two are deliberately distinct: the cache's own `Arc` share does not
//! count as a user reference.

use crate::engine::PatternProgram;
use crate::metrics::PatternCacheCounters;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// An owned compiled regex program with its cache metadata.
pub struct CompiledPattern {
    program: Box<dyn PatternProgram>,
    pattern: String,
    case_sensitive: bool,
    size_bytes: usize,
    refcount: AtomicU32,
}

impl CompiledPattern {
    pub(crate) fn new(
        program: Box<dyn PatternProgram>,
        pattern: String,
        case_sensitive: bool,
    ) -> Self {
        let size_bytes = program.size_bytes();
        Self {
            program,
            pattern,
            case_sensitive,
            size_bytes,
            refcount: AtomicU32::new(0),
        }
    }

    /// Whether the pattern matches anywhere in `input`.
    pub fn is_match(&self, input: &[u8]) -> bool {
        self.program.is_match(input)
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Exact program size in bytes as reported by the engine at compile time.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of live caller references.
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Increment the refcount. The hit path calls this while the lookup
    /// guard is still held, closing the window in which eviction could
    /// observe zero.
    #[inline]
    pub(crate) fn acquire(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the refcount, returning the remaining count.
    #[inline]
    pub(crate) fn release_count(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("pattern", &self.pattern)
            .field("case_sensitive", &self.case_sensitive)
            .field("size_bytes", &self.size_bytes)
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish()
    }
}

/// A caller's reference to a compiled pattern.
///
/// Dropping the reference performs the release protocol: the refcount is
/// decremented and the release counters move. Release must go through this
/// handle rather than a key lookup, because the entry may have migrated to
/// the deferred cache where key-based lookup cannot see it.
pub struct PatternRef {
    pattern: Arc<CompiledPattern>,
    counters: Arc<PatternCacheCounters>,
}

impl PatternRef {
    /// Wrap an already-acquired pattern. The refcount increment must have
    /// happened before construction (under the lookup guard on the hit
    /// path, before insertion on the miss path).
    pub(crate) fn new(pattern: Arc<CompiledPattern>, counters: Arc<PatternCacheCounters>) -> Self {
        Self { pattern, counters }
    }

    /// Explicitly release the reference. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Deref for PatternRef {
    type Target = CompiledPattern;

    fn deref(&self) -> &CompiledPattern {
        &self.pattern
    }
}

impl fmt::Debug for PatternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PatternRef").field(&*self.pattern).finish()
    }
}

impl Drop for PatternRef {
    fn drop(&mut self) {
        let remaining = self.pattern.release_count();
        self.counters.record_release(remaining == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PatternEngine, RegexEngine};
    use std::sync::atomic::Ordering;

    fn compile(pattern: &str) -> CompiledPattern {
        let program = RegexEngine.compile(pattern, true).unwrap();
        CompiledPattern::new(program, pattern.to_string(), true)
    }

    #[test]
    fn test_refcount_acquire_release() {
        let pattern = compile("x+");
        assert_eq!(pattern.refcount(), 0);
        assert_eq!(pattern.acquire(), 1);
        assert_eq!(pattern.acquire(), 2);
        assert_eq!(pattern.release_count(), 1);
        assert_eq!(pattern.release_count(), 0);
    }

    #[test]
    fn test_pattern_ref_drop_releases() {
        let counters = Arc::new(PatternCacheCounters::default());
        let pattern = Arc::new(compile("x+"));
        pattern.acquire();
        let reference = PatternRef::new(Arc::clone(&pattern), Arc::clone(&counters));
        assert_eq!(pattern.refcount(), 1);
        drop(reference);
        assert_eq!(pattern.refcount(), 0);
        assert_eq!(counters.pattern_releases.load(Ordering::Relaxed), 1);
        assert_eq!(counters.patterns_released_to_zero.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_release_to_zero_only_on_last() {
        let counters = Arc::new(PatternCacheCounters::default());
        let pattern = Arc::new(compile("x+"));
        pattern.acquire();
        pattern.acquire();
        let first = PatternRef::new(Arc::clone(&pattern), Arc::clone(&counters));
        let second = PatternRef::new(Arc::clone(&pattern), Arc::clone(&counters));
        first.release();
        assert_eq!(counters.patterns_released_to_zero.load(Ordering::Relaxed), 0);
        second.release();
        assert_eq!(counters.pattern_releases.load(Ordering::Relaxed), 2);
        assert_eq!(counters.patterns_released_to_zero.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deref_matches() {
        let counters = Arc::new(PatternCacheCounters::default());
        let pattern = Arc::new(compile(r"ab\d"));
        pattern.acquire();
        let reference = PatternRef::new(pattern, counters);
        assert!(reference.is_match(b"ab1"));
        assert_eq!(reference.pattern(), r"ab\d");
    }
}
