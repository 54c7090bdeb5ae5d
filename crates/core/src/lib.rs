//! `stockflow-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger and the
//! product crates (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;
pub mod readiness;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AlternativeId, LedgerEntryId, ProductId, RequirementGroupId, StockItemId};
pub use quantity::Quantity;
pub use readiness::{Readiness, ReadinessComparison, ReadinessOrder, UnlimitedStock};
