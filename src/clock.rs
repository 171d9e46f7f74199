//! Process-wide monotonic clock in milliseconds.
//!
//! Cache timestamps must be totally ordered across threads and immune to
//! wall-clock adjustments, so everything time-related inside the caches is
//! measured against a single `Instant` captured on first use.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds elapsed since the process epoch.
#[inline]
pub(crate) fn now_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}
