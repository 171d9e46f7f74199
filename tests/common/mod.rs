//! Shared engine doubles for integration tests.
#![allow(dead_code)]

use libre2_cache::{EngineError, PatternEngine, PatternProgram};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Route tracing output (leak diagnostics in particular) through the test
/// harness. Safe to call from every test; only the first call installs.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine reporting a fixed program size, so byte budgets in tests are
/// exact. Patterns starting with `[` fail to compile. Tracks how many
/// compiled programs are currently alive: a program destroyed twice would
/// panic the tracker, and a leak shows up as a non-zero count after all
/// references are gone.
pub struct FixedSizeEngine {
    size: usize,
    compilations: AtomicUsize,
    live_programs: Arc<AtomicUsize>,
    compile_delay: Duration,
}

impl FixedSizeEngine {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            compilations: AtomicUsize::new(0),
            live_programs: Arc::new(AtomicUsize::new(0)),
            compile_delay: Duration::ZERO,
        }
    }

    pub fn with_delay(size: usize, delay: Duration) -> Self {
        Self {
            compile_delay: delay,
            ..Self::new(size)
        }
    }

    /// Total number of compile calls, successful or not.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    /// Number of compiled programs not yet destroyed.
    pub fn live_programs(&self) -> usize {
        self.live_programs.load(Ordering::SeqCst)
    }
}

struct TrackedProgram {
    size: usize,
    live_programs: Arc<AtomicUsize>,
}

impl PatternProgram for TrackedProgram {
    fn is_match(&self, _input: &[u8]) -> bool {
        true
    }

    fn size_bytes(&self) -> usize {
        self.size
    }
}

impl Drop for TrackedProgram {
    fn drop(&mut self) {
        let previous = self.live_programs.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "compiled program destroyed more than once");
    }
}

impl PatternEngine for FixedSizeEngine {
    fn compile(
        &self,
        pattern: &str,
        _case_sensitive: bool,
    ) -> Result<Box<dyn PatternProgram>, EngineError> {
        self.compilations.fetch_add(1, Ordering::SeqCst);
        if !self.compile_delay.is_zero() {
            std::thread::sleep(self.compile_delay);
        }
        if pattern.starts_with('[') {
            return Err(EngineError::new(format!("missing closing ]: `{}`", pattern)));
        }
        self.live_programs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedProgram {
            size: self.size,
            live_programs: Arc::clone(&self.live_programs),
        }))
    }
}
