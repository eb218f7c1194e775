//! Crate-level error taxonomy
//!
//! Per-item failures in background paths are logged and counted, never
//! propagated out of a batch; these types cover everything else.

use crate::store::StoreError;

/// Top-level error for lifecycle operations
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A physical store was unreachable or rejected the operation
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The feature classifier or personal-data guard errored
    #[error("classification failed: {0}")]
    Classification(String),
    /// Malformed candidate (missing question/answer, bad score range)
    #[error("validation failed: {0}")]
    Validation(String),
    /// An external call exceeded its operation timeout
    #[error("operation timed out: {0}")]
    Timeout(String),
}

/// Lifecycle result type
pub type Result<T> = std::result::Result<T, LifecycleError>;
