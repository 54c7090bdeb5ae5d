//! Purchasable units and their availability.
//!
//! A product (purchasable unit) is described by requirement groups: fixed
//! lists of stock items that are always consumed, and select-one groups whose
//! alternatives (options) each map to their own stock items. This crate turns
//! that structure into per-item demand and searches the option combinations
//! for the soonest fully available one. Pure domain logic: no IO, no storage.

pub mod evaluation;
pub mod product;
pub mod requirements;
pub mod search;

pub use evaluation::{AlternativeAvailability, UnitEvaluation, evaluate_product};
pub use product::{
    AddAlternative, AddGroup, Alternative, AlternativeAdded, AlternativeRemoved, AttachRequirement,
    CreateProduct, DeleteProduct, DetachRequirement, GroupAdded, GroupKind, GroupRemoved,
    GroupSpec, Product, ProductCommand, ProductCreated, ProductDeleted, ProductEvent,
    RemoveAlternative, RemoveGroup, Requirement, RequirementAttached, RequirementDetached,
    RequirementGroup, RequirementTarget, RequiredQuantityChanged, SetRequiredQuantity,
};
pub use requirements::{Candidate, ChoiceGroup, Demand, RequirementSet};
pub use search::{
    ItemResolver, MemoizedResolver, SearchLimits, SearchOutcome, best_available_combination,
    evaluate_demand,
};
