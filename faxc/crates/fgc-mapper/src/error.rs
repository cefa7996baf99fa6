//! Error Module - Mapper Error Types
//!
//! Defines all error types returned by the region mapper.
//!
//! # Error Categories
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid sizes or incompatible granularities
//!
//! ## Physical Memory Errors
//! - `OutOfMemory` - The OS refused to back a commit request
//! - `Uncommit` - The OS refused to release committed pages
//! - `VirtualMemory` - Reservation or release of address space failed
//!
//! Invariant violations (double commit, double uncommit, out-of-range
//! region indices) are not errors. They indicate a bug in the caller's
//! bookkeeping and panic through [`assert_context!`](crate::assert_context).

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all mapper operations
///
/// Every variant is fatal at this layer: the mapper never retries and never
/// rolls back a partially committed batch. Callers are expected to treat a
/// failed resize as unrecoverable.
///
/// # Examples
///
/// ```rust
/// use fgc_mapper::MapperError;
///
/// fn handle_error(err: MapperError) {
///     match err {
///         MapperError::OutOfMemory { requested, page } => {
///             eprintln!("OOM: {} bytes at page {}", requested, page);
///         }
///         _ => eprintln!("mapper failure: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum MapperError {
    /// Configuration error
    ///
    /// **When returned:** Construction parameters fail validation
    /// (non-power-of-two sizes, granularities that do not divide each
    /// other, storage that does not match the configuration).
    ///
    /// **Recovery strategy:** None - abort startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Out of memory - the OS refused to back a commit
    ///
    /// **When returned:** `commit` on the underlying storage failed
    ///
    /// **Recovery strategy:** None at this layer. Pages committed earlier in
    /// the same batch stay committed.
    #[error("Out of memory: failed to commit {requested} bytes at page {page}")]
    OutOfMemory { requested: usize, page: usize },

    /// Uncommit failed
    ///
    /// **When returned:** The OS refused to release committed pages
    #[error("Uncommit failed: {0}")]
    Uncommit(String),

    /// Virtual memory error
    ///
    /// **When returned:** Address space reservation or release failed
    #[error("Virtual memory error: {0}")]
    VirtualMemory(String),
}

impl MapperError {
    /// Check if this error is fatal
    ///
    /// Every mapper error is fatal; the method exists so that callers that
    /// aggregate errors from several subsystems can branch uniformly.
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Check if this error was caused by exhausted physical memory
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, MapperError::OutOfMemory { .. })
    }
}

impl From<ConfigError> for MapperError {
    fn from(err: ConfigError) -> Self {
        MapperError::Configuration(err.to_string())
    }
}

/// Result type alias for mapper operations
pub type Result<T> = std::result::Result<T, MapperError>;

/// Macro for assertion with context
///
/// Used for invariant checks whose failure is a programming error.
#[macro_export]
macro_rules! assert_context {
    ($cond:expr, $context:expr) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), $context);
        }
    };
    ($cond:expr, $context:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), format!($context, $($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_display() {
        let err = MapperError::OutOfMemory {
            requested: 8192,
            page: 3,
        };
        assert!(err.is_out_of_memory());
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Out of memory: failed to commit 8192 bytes at page 3"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: MapperError = ConfigError::InvalidPageSize("3 is not a power of two".into()).into();
        assert!(matches!(err, MapperError::Configuration(_)));
        assert!(!err.is_out_of_memory());
    }

    #[test]
    #[should_panic(expected = "region 7")]
    fn test_assert_context_formats_message() {
        let committed = true;
        assert_context!(!committed, "region {} already committed", 7);
    }
}
