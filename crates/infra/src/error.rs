//! Infrastructure error model.

use stockflow_core::DomainError;
use thiserror::Error;

/// Persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The stored aggregate moved past the version the writer loaded.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The backend could not serve the request (lock poisoned, connection lost).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Error surfaced by the availability service and the cache updater.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Publication failed after the change and its cache update were committed.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Domain(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::Store(StoreError::Concurrency(_)) | ServiceError::Domain(DomainError::Conflict(_))
        )
    }
}
