//! Cache configuration.
//!
//! An immutable parameter bundle parsed from a declarative JSON document.
//! Every key is optional; defaults are applied during parse. Validation is
//! strict and runs before any cache is constructed: an invalid combination
//! rejects with [`CacheError::Config`] and a human-readable reason.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_CAPACITY_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_STRING_THRESHOLD_BYTES: u64 = 10 * 1024;
const DEFAULT_TTL_MS: i64 = 300_000;
const DEFAULT_DEFERRED_TTL_MS: i64 = 600_000;
const DEFAULT_LRU_BATCH_SIZE: u64 = 100;
const DEFAULT_EVICTION_INTERVAL_MS: i64 = 100;

fn default_true() -> bool {
    true
}
fn default_capacity_bytes() -> u64 {
    DEFAULT_CAPACITY_BYTES
}
fn default_string_threshold_bytes() -> u64 {
    DEFAULT_STRING_THRESHOLD_BYTES
}
fn default_ttl_ms() -> i64 {
    DEFAULT_TTL_MS
}
fn default_deferred_ttl_ms() -> i64 {
    DEFAULT_DEFERRED_TTL_MS
}
fn default_lru_batch_size() -> u64 {
    DEFAULT_LRU_BATCH_SIZE
}
fn default_eviction_interval_ms() -> i64 {
    DEFAULT_EVICTION_INTERVAL_MS
}

/// Validated, immutable cache parameters.
///
/// All byte budgets are soft limits: eviction tries to honor them but may
/// exceed them transiently when no evictable candidates exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Global off-switch; when false, patterns compile but are never cached
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Enable the match-result cache
    #[serde(default = "default_true")]
    pub pattern_result_cache_enabled: bool,

    /// Soft byte budget for the result cache
    #[serde(default = "default_capacity_bytes")]
    pub pattern_result_cache_target_capacity_bytes: u64,

    /// Inputs larger than this are never cached in the result cache
    #[serde(default = "default_string_threshold_bytes")]
    pub pattern_result_cache_string_threshold_bytes: u64,

    /// Idle-eviction horizon for result entries
    #[serde(default = "default_ttl_ms")]
    pub pattern_result_cache_ttl_ms: i64,

    /// Select the sharded concurrent-map backing for the result cache
    #[serde(default)]
    pub pattern_result_cache_use_tbb: bool,

    /// Soft byte budget for the pattern cache
    #[serde(default = "default_capacity_bytes")]
    pub pattern_cache_target_capacity_bytes: u64,

    /// Idle-eviction horizon for compiled patterns
    #[serde(default = "default_ttl_ms")]
    pub pattern_cache_ttl_ms: i64,

    /// Select the sharded concurrent-map backing for the pattern cache
    #[serde(default)]
    pub pattern_cache_use_tbb: bool,

    /// Max entries evicted per LRU pass iteration
    #[serde(default = "default_lru_batch_size")]
    pub pattern_cache_lru_batch_size: u64,

    /// Forced-eviction (leak) horizon; must exceed `pattern_cache_ttl_ms`
    #[serde(default = "default_deferred_ttl_ms")]
    pub deferred_cache_ttl_ms: i64,

    /// Start the eviction thread at manager construction
    #[serde(default = "default_true")]
    pub auto_start_eviction_thread: bool,

    /// Sweep period of the eviction thread
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_check_interval_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            pattern_result_cache_enabled: true,
            pattern_result_cache_target_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            pattern_result_cache_string_threshold_bytes: DEFAULT_STRING_THRESHOLD_BYTES,
            pattern_result_cache_ttl_ms: DEFAULT_TTL_MS,
            pattern_result_cache_use_tbb: false,
            pattern_cache_target_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            pattern_cache_ttl_ms: DEFAULT_TTL_MS,
            pattern_cache_use_tbb: false,
            pattern_cache_lru_batch_size: DEFAULT_LRU_BATCH_SIZE,
            deferred_cache_ttl_ms: DEFAULT_DEFERRED_TTL_MS,
            auto_start_eviction_thread: true,
            eviction_check_interval_ms: DEFAULT_EVICTION_INTERVAL_MS,
        }
    }
}

impl CacheConfig {
    /// Parse a JSON document, applying defaults for absent keys and
    /// rejecting unknown keys and invalid combinations.
    pub fn from_json(document: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to a JSON document. Parsing the output yields an
    /// equal configuration.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate parameter combinations. Called by [`Self::from_json`] and by
    /// the manager before construction.
    pub fn validate(&self) -> Result<()> {
        if self.cache_enabled && self.pattern_cache_target_capacity_bytes == 0 {
            return Err(CacheError::config(
                "pattern_cache_target_capacity_bytes must be non-zero when caching is enabled",
            ));
        }
        if self.cache_enabled && self.pattern_cache_ttl_ms <= 0 {
            return Err(CacheError::config(
                "pattern_cache_ttl_ms must be positive when caching is enabled",
            ));
        }
        if self.result_cache_active() && self.pattern_result_cache_target_capacity_bytes == 0 {
            return Err(CacheError::config(
                "pattern_result_cache_target_capacity_bytes must be non-zero when the result cache is enabled",
            ));
        }
        if self.result_cache_active() && self.pattern_result_cache_ttl_ms <= 0 {
            return Err(CacheError::config(
                "pattern_result_cache_ttl_ms must be positive when the result cache is enabled",
            ));
        }
        if self.pattern_cache_lru_batch_size == 0 {
            return Err(CacheError::config("pattern_cache_lru_batch_size must be non-zero"));
        }
        if self.deferred_cache_ttl_ms <= self.pattern_cache_ttl_ms {
            return Err(CacheError::config(format!(
                "deferred_cache_ttl_ms ({}) must exceed pattern_cache_ttl_ms ({})",
                self.deferred_cache_ttl_ms, self.pattern_cache_ttl_ms
            )));
        }
        if self.eviction_check_interval_ms <= 0 {
            return Err(CacheError::config("eviction_check_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Whether the result cache participates at all (requires the global
    /// switch as well as its own).
    pub fn result_cache_active(&self) -> bool {
        self.cache_enabled && self.pattern_result_cache_enabled
    }

    pub(crate) fn pattern_cache_ttl(&self) -> u64 {
        self.pattern_cache_ttl_ms.max(0) as u64
    }

    pub(crate) fn result_cache_ttl(&self) -> u64 {
        self.pattern_result_cache_ttl_ms.max(0) as u64
    }

    pub(crate) fn deferred_cache_ttl(&self) -> u64 {
        self.deferred_cache_ttl_ms.max(0) as u64
    }

    pub(crate) fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_check_interval_ms.max(1) as u64)
    }
}
