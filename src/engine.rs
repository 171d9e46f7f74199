//! The external engine contract and the default `regex`-backed engine.
//!
//! The core never compiles or matches anything itself: it delegates to a
//! [`PatternEngine`] and caches the [`PatternProgram`]s it hands back. The
//! default engine wraps the `regex` crate, which provides the linear-time
//! matching guarantee the core assumes. Tests substitute doubles to control
//! program sizes and observe destruction.

use regex::bytes::RegexBuilder;
use thiserror::Error;

/// Rejection text from the engine for a pattern it refuses to compile.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self { message: message.into() }
    }
}

/// A compiled, immutable regex program.
///
/// Programs are matched concurrently from arbitrary threads after
/// compilation; implementations must be internally immutable.
pub trait PatternProgram: Send + Sync {
    /// Whether the program matches anywhere in `input`. Inputs are opaque
    /// byte sequences; encoding is the caller's concern.
    fn is_match(&self, input: &[u8]) -> bool;

    /// The program's reported memory footprint in bytes. Must be stable for
    /// the lifetime of the program.
    fn size_bytes(&self) -> usize;
}

/// Compiles pattern strings into programs.
pub trait PatternEngine: Send + Sync {
    fn compile(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Box<dyn PatternProgram>, EngineError>;
}

// The regex crate does not expose compiled-program size, so the default
// engine reports a deterministic estimate: a fixed base plus a per-byte
// program cost. Tests needing exact sizes inject their own engine.
const PROGRAM_BASE_BYTES: usize = 1024;
const PROGRAM_BYTES_PER_PATTERN_BYTE: usize = 64;

/// Default engine backed by `regex::bytes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexEngine;

struct RegexProgram {
    regex: regex::bytes::Regex,
    size_bytes: usize,
}

impl PatternProgram for RegexProgram {
    fn is_match(&self, input: &[u8]) -> bool {
        self.regex.is_match(input)
    }

    fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

impl PatternEngine for RegexEngine {
    fn compile(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Box<dyn PatternProgram>, EngineError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .unicode(true)
            .build()
            .map_err(|e| EngineError::new(e.to_string()))?;
        let size_bytes = PROGRAM_BASE_BYTES + pattern.len() * PROGRAM_BYTES_PER_PATTERN_BYTE;
        Ok(Box::new(RegexProgram { regex, size_bytes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_match() {
        let program = RegexEngine.compile(r"ab\d+", true).unwrap();
        assert!(program.is_match(b"xxab123yy"));
        assert!(!program.is_match(b"AB123"));
    }

    #[test]
    fn test_case_insensitive() {
        let program = RegexEngine.compile(r"ab\d+", false).unwrap();
        assert!(program.is_match(b"AB123"));
        assert!(program.is_match(b"ab123"));
    }

    #[test]
    fn test_rejects_bad_pattern_with_text() {
        let err = match RegexEngine.compile(r"[unclosed", true) {
            Err(e) => e,
            Ok(_) => panic!("expected compile to fail"),
        };
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_size_deterministic_and_positive() {
        let a = RegexEngine.compile(r"abc", true).unwrap();
        let b = RegexEngine.compile(r"abc", true).unwrap();
        assert_eq!(a.size_bytes(), b.size_bytes());
        assert!(a.size_bytes() > 0);
        // longer patterns report larger programs
        let long = RegexEngine.compile(r"abcdefghijklmnop", true).unwrap();
        assert!(long.size_bytes() > a.size_bytes());
    }
}
