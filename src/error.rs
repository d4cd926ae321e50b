//! Error types for vstore
//!
//! Lookups never fail: absence is reported as an empty handle, `None` or a
//! zero count. Only mutations and construction return errors.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Unified error type for vstore operations
#[derive(Debug, Error)]
pub enum StorageError {
    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    /// An index structure could not be allocated. The mutation that hit this
    /// was not applied and the published version did not move.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<TryReserveError> for StorageError {
    fn from(err: TryReserveError) -> Self {
        StorageError::ResourceExhausted(err.to_string())
    }
}
