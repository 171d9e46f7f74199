//! Cache manager: single entry point and lifecycle owner.
//!
//! Owns the configuration, the engine, the three caches and the eviction
//! thread. Construction wires the caches together in dependency order;
//! destruction strictly reverses it so in-use patterns always get a cleanup
//! chance through the deferred cache.

use crate::cache::{DeferredCache, PatternCache, ResultCache};
use crate::config::CacheConfig;
use crate::engine::{PatternEngine, RegexEngine};
use crate::error::Result;
use crate::eviction::EvictionThread;
use crate::metrics::{generated_at_now, CacheReport};
use crate::pattern::PatternRef;
use std::sync::Arc;
use tracing::info;

pub struct CacheManager {
    config: CacheConfig,
    result_cache: Arc<ResultCache>,
    pattern_cache: Arc<PatternCache>,
    deferred_cache: Arc<DeferredCache>,
    eviction: EvictionThread,
}

impl CacheManager {
    /// Construct with the default `regex`-backed engine.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(RegexEngine))
    }

    /// Construct with an injected engine (alternative engines, test
    /// doubles). Validates the configuration, builds result, pattern and
    /// deferred caches in that order, then the eviction thread over all
    /// three, auto-starting it if configured.
    pub fn with_engine(config: CacheConfig, engine: Arc<dyn PatternEngine>) -> Result<Self> {
        config.validate()?;

        let result_cache = Arc::new(ResultCache::new(&config));
        let pattern_cache = Arc::new(PatternCache::new(&config, engine));
        let deferred_cache = Arc::new(DeferredCache::new(config.deferred_cache_ttl()));
        let eviction = EvictionThread::new(
            Arc::clone(&result_cache),
            Arc::clone(&pattern_cache),
            Arc::clone(&deferred_cache),
            config.eviction_interval(),
        );

        let manager = Self {
            config,
            result_cache,
            pattern_cache,
            deferred_cache,
            eviction,
        };
        if manager.config.auto_start_eviction_thread {
            manager.eviction.start();
        }
        info!(
            cache_enabled = manager.config.cache_enabled,
            result_cache = manager.result_cache.is_enabled(),
            eviction_running = manager.eviction.is_running(),
            "cache manager constructed"
        );
        Ok(manager)
    }

    /// Look up or compile a pattern through the pattern cache.
    pub fn get_or_compile(&self, pattern: &str, case_sensitive: bool) -> Result<PatternRef> {
        self.pattern_cache.get_or_compile(pattern, case_sensitive)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn pattern_cache(&self) -> &PatternCache {
        &self.pattern_cache
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.result_cache
    }

    pub fn deferred_cache(&self) -> &DeferredCache {
        &self.deferred_cache
    }

    pub fn start_eviction(&self) {
        self.eviction.start();
    }

    pub fn stop_eviction(&self) {
        self.eviction.stop();
    }

    pub fn is_eviction_running(&self) -> bool {
        self.eviction.is_running()
    }

    /// A fresh, caller-local metrics snapshot. Deliberately does not read
    /// the eviction thread's periodically-refreshed report, so concurrent
    /// readers never race its writer.
    pub fn metrics_report(&self) -> CacheReport {
        CacheReport {
            pattern_result_cache: self.result_cache.snapshot_metrics(),
            pattern_cache: self.pattern_cache.snapshot_metrics(),
            deferred_cache: self.deferred_cache.snapshot_metrics(),
            generated_at: generated_at_now(),
        }
    }

    /// The fresh snapshot serialized as the metrics JSON document.
    pub fn get_metrics_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.metrics_report())?)
    }

    /// The report last refreshed by the eviction thread.
    pub fn last_refreshed_report(&self) -> CacheReport {
        self.eviction.last_report()
    }

    /// Clear all caches, preserving the eviction thread's running state
    /// across the call.
    pub fn clear_all(&self) {
        let was_running = self.eviction.is_running();
        if was_running {
            self.eviction.stop();
        }
        self.pattern_cache.clear(&self.deferred_cache);
        self.result_cache.clear();
        self.deferred_cache.clear();
        if was_running {
            self.eviction.start();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.eviction.stop();
        self.pattern_cache.clear(&self.deferred_cache);
        self.result_cache.clear();
        self.deferred_cache.clear();
    }
}
