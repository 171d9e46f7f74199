//! # libre2-cache
//!
//! A thread-safe caching core for compiled regular expression patterns.
//! The crate amortizes expensive pattern compilation across many matching
//! operations, bounds memory with soft byte budgets, and guarantees that
//! no in-use pattern is ever freed, even under concurrent access, eviction
//! storms and caller misuse.
//!
//! ## Architecture
//!
//! - **Pattern cache**: the authoritative map from pattern key to compiled
//!   pattern, with refcounted sharing and a soft byte budget.
//! - **Result cache** (optional): fixed-cost match outcomes keyed by
//!   (pattern hash, input hash); inputs are never stored.
//! - **Deferred cache**: parks patterns evicted while still in use until
//!   their last holder releases them, with a leak-detecting safety horizon.
//! - **Eviction thread**: a single named background thread sweeping all
//!   three caches on a drift-corrected schedule.
//! - **Manager**: lifecycle owner and the only type external collaborators
//!   need to touch.
//!
//! ## Example
//!
//! ```
//! use libre2_cache::{CacheConfig, CacheManager};
//!
//! let manager = CacheManager::new(CacheConfig::default()).unwrap();
//! let pattern = manager.get_or_compile(r"ab\d+", true).unwrap();
//! assert!(pattern.is_match(b"ab123"));
//! pattern.release();
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod hash;
pub mod manager;
pub mod metrics;
pub mod pattern;

mod clock;

// Re-export commonly used types
pub use crate::cache::{DeferredCache, PatternCache, ResultCache};
pub use crate::config::CacheConfig;
pub use crate::engine::{EngineError, PatternEngine, PatternProgram, RegexEngine};
pub use crate::error::{CacheError, Result};
pub use crate::eviction::EvictionThread;
pub use crate::manager::CacheManager;
pub use crate::metrics::{CacheReport, RESULT_ENTRY_SIZE};
pub use crate::pattern::{CompiledPattern, PatternRef};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
