//! Error types for the caching core.
//!
//! Callers see exactly two failure surfaces: a configuration document that
//! fails validation and a pattern the engine refuses to compile. Everything
//! else is absorbed internally and shows up in metrics, never as control
//! flow.

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type for the caching core
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration document failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine rejected the pattern; carries the engine's error text
    #[error("pattern compilation failed: {0}")]
    Compilation(String),

    /// Pattern strings must be non-empty
    #[error("empty pattern string")]
    EmptyPattern,

    /// Configuration or metrics document (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a new configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new compilation error carrying the engine's message
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::Compilation(message.into())
    }
}
