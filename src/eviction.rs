//! Background eviction thread.
//!
//! A single dedicated OS thread that periodically sweeps the three caches
//! and refreshes the metrics report. Sweep order is fixed (result, pattern,
//! deferred) and strictly sequential: no two cache locks are ever held at
//! once, so the thread cannot deadlock against callers. The schedule is
//! drift-corrected: a sweep that overruns its interval resets the next
//! deadline instead of compounding lateness.

use crate::cache::{DeferredCache, PatternCache, ResultCache};
use crate::clock::now_ms;
use crate::metrics::{generated_at_now, CacheReport};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const THREAD_NAME: &str = "libre2-evict";

struct Shared {
    result_cache: Arc<ResultCache>,
    pattern_cache: Arc<PatternCache>,
    deferred_cache: Arc<DeferredCache>,
    interval_ms: u64,
    running: AtomicBool,
    stop_requested: Mutex<bool>,
    stop_signal: Condvar,
    last_report: Mutex<CacheReport>,
}

impl Shared {
    /// One sweep of all three caches plus a metrics refresh. Each step is
    /// isolated so a failure degrades observability, never the loop.
    fn run_cycle(&self) {
        let now = now_ms();
        if self.result_cache.is_enabled() {
            self.step("result cache", || {
                self.result_cache.evict(now);
            });
        }
        self.step("pattern cache", || {
            self.pattern_cache.evict(&self.deferred_cache, now);
        });
        self.step("deferred cache", || {
            self.deferred_cache.evict(now);
        });
        self.step("metrics refresh", || {
            let report = CacheReport {
                pattern_result_cache: self.result_cache.snapshot_metrics(),
                pattern_cache: self.pattern_cache.snapshot_metrics(),
                deferred_cache: self.deferred_cache.snapshot_metrics(),
                generated_at: generated_at_now(),
            };
            *self.last_report.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = report;
        });
    }

    fn step(&self, name: &str, op: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(op)).is_err() {
            error!(step = name, "eviction step failed; continuing");
        }
    }

    fn sweep_loop(&self) {
        debug!(interval_ms = self.interval_ms, "eviction thread started");
        let mut next_cycle = now_ms() + self.interval_ms;
        loop {
            // wait until the deadline or a stop request, whichever first
            {
                let mut stop = self
                    .stop_requested
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                loop {
                    if *stop {
                        debug!("eviction thread stopping");
                        return;
                    }
                    let now = now_ms();
                    if now >= next_cycle {
                        break;
                    }
                    let (guard, _timeout) = self
                        .stop_signal
                        .wait_timeout(stop, Duration::from_millis(next_cycle - now))
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    stop = guard;
                }
            }

            self.run_cycle();

            next_cycle += self.interval_ms;
            let now = now_ms();
            if next_cycle <= now {
                // the sweep overran the interval; re-anchor instead of
                // accumulating lateness
                next_cycle = now + self.interval_ms;
            }
        }
    }
}

/// Lifecycle handle for the background sweeper. Constructed stopped;
/// `start` and `stop` are idempotent.
pub struct EvictionThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionThread {
    pub(crate) fn new(
        result_cache: Arc<ResultCache>,
        pattern_cache: Arc<PatternCache>,
        deferred_cache: Arc<DeferredCache>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                result_cache,
                pattern_cache,
                deferred_cache,
                interval_ms: interval.as_millis().max(1) as u64,
                running: AtomicBool::new(false),
                stop_requested: Mutex::new(false),
                stop_signal: Condvar::new(),
                last_report: Mutex::new(CacheReport::default()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the sweeper. A no-op if it is already running. The handle
    /// mutex serializes start against stop, so overlapping calls from
    /// different threads cannot leave a stray sweeper behind.
    pub fn start(&self) {
        let mut handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self
            .shared
            .stop_requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = false;

        let shared = Arc::clone(&self.shared);
        let spawned = Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || shared.sweep_loop());
        match spawned {
            Ok(joinable) => {
                *handle = Some(joinable);
                info!("eviction thread started");
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                warn!(error = %e, "failed to spawn eviction thread");
            }
        }
    }

    /// Stop the sweeper and join it. A no-op if it is not running. Shutdown
    /// latency is one condition-variable hop, not a full sweep interval.
    pub fn stop(&self) {
        let mut handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let mut stop = self
                .shared
                .stop_requested
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *stop = true;
        }
        self.shared.stop_signal.notify_all();
        if let Some(joinable) = handle.take() {
            if joinable.join().is_err() {
                error!("eviction thread panicked before join");
            }
        }
        info!("eviction thread stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The report refreshed by the thread on its last sweep.
    pub fn last_report(&self) -> CacheReport {
        self.shared
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for EvictionThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::engine::RegexEngine;
    use std::thread;

    fn fixture(interval_ms: u64) -> (EvictionThread, Arc<PatternCache>, Arc<DeferredCache>) {
        let config = CacheConfig {
            pattern_cache_ttl_ms: 50,
            deferred_cache_ttl_ms: 10_000,
            eviction_check_interval_ms: interval_ms as i64,
            ..CacheConfig::default()
        };
        let result_cache = Arc::new(ResultCache::new(&config));
        let pattern_cache = Arc::new(PatternCache::new(&config, Arc::new(RegexEngine)));
        let deferred_cache = Arc::new(DeferredCache::new(config.deferred_cache_ttl()));
        let thread = EvictionThread::new(
            result_cache,
            Arc::clone(&pattern_cache),
            Arc::clone(&deferred_cache),
            config.eviction_interval(),
        );
        (thread, pattern_cache, deferred_cache)
    }

    #[test]
    fn test_starts_stopped() {
        let (thread, _, _) = fixture(10);
        assert!(!thread.is_running());
    }

    #[test]
    fn test_idempotent_start_stop() {
        let (thread, _, _) = fixture(10);
        thread.start();
        thread.start();
        assert!(thread.is_running());
        thread.stop();
        thread.stop();
        assert!(!thread.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let (thread, _, _) = fixture(10);
        thread.start();
        thread.stop();
        thread.start();
        assert!(thread.is_running());
        thread.stop();
    }

    #[test]
    fn test_sweeps_expired_entries() {
        let (thread, pattern_cache, _) = fixture(10);
        pattern_cache.get_or_compile("x", true).unwrap().release();
        thread.start();
        thread::sleep(Duration::from_millis(200));
        thread.stop();
        assert_eq!(pattern_cache.len(), 0);
        assert_eq!(pattern_cache.snapshot_metrics().evictions.ttl, 1);
    }

    #[test]
    fn test_refreshes_report() {
        let (thread, pattern_cache, _) = fixture(10);
        pattern_cache.get_or_compile("x", true).unwrap().release();
        thread.start();
        thread::sleep(Duration::from_millis(100));
        thread.stop();
        let report = thread.last_report();
        assert!(!report.generated_at.is_empty());
        assert_eq!(report.pattern_cache.misses, 1);
    }

    #[test]
    fn test_prompt_shutdown() {
        let (thread, _, _) = fixture(60_000);
        thread.start();
        let started = std::time::Instant::now();
        thread.stop();
        // shutdown must not wait out the sweep interval
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
