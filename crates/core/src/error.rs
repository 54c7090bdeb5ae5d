//! Domain error model.

use thiserror::Error;

use crate::id::{ProductId, StockItemId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, unknown
/// references). Storage failures belong to the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A ledger entry was given both a shipping time and a shipping date.
    #[error("a ledger entry cannot carry both shipping_time and shipping_date")]
    InvalidEntryKind,

    /// A referenced stock item does not exist.
    #[error("stock item not found: {0}")]
    ItemNotFound(StockItemId),

    /// A referenced purchasable unit does not exist (or was deleted).
    #[error("purchasable unit not found: {0}")]
    UnitNotFound(ProductId),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True for the not-found family (mapped to 404-style responses by callers).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound(_) | Self::UnitNotFound(_))
    }
}
