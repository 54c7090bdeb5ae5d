//! Whole-unit evaluation: combination search plus per-option flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AlternativeId, RequirementGroupId};
use stockflow_inventory::Availability;

use crate::product::{GroupKind, Product};
use crate::requirements::{Demand, RequirementSet};
use crate::search::{ItemResolver, SearchLimits, best_available_combination, evaluate_demand};

/// Availability of one option on its own demand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeAvailability {
    pub group_id: RequirementGroupId,
    pub alternative_id: AlternativeId,
    pub availability: Availability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEvaluation {
    pub availability: Availability,
    /// Soonest combination, one alternative per required select group.
    pub selection: Vec<AlternativeId>,
    /// Every option of every select group, optional groups included.
    pub alternatives: Vec<AlternativeAvailability>,
    pub evaluated: usize,
    pub truncated: bool,
}

impl UnitEvaluation {
    fn unavailable() -> Self {
        Self {
            availability: Availability::unavailable(),
            selection: Vec::new(),
            alternatives: Vec::new(),
            evaluated: 0,
            truncated: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability.is_available()
    }

    pub fn shipping_time(&self) -> Option<u32> {
        self.availability.shipping_time()
    }

    pub fn shipping_date(&self) -> Option<DateTime<Utc>> {
        self.availability.shipping_date()
    }
}

/// Evaluate a product against the items the resolver can see.
///
/// A deleted (or never created) product is unavailable.
pub fn evaluate_product<R: ItemResolver + ?Sized>(
    product: &Product,
    resolver: &R,
    limits: &SearchLimits,
) -> UnitEvaluation {
    if !product.is_live() {
        return UnitEvaluation::unavailable();
    }

    let set = RequirementSet::from_product(product);
    let outcome = best_available_combination(&set, resolver, limits);

    let mut alternatives = Vec::new();
    for group in product.groups() {
        if let GroupKind::SelectOne { alternatives: options, .. } = &group.kind {
            for alt in options {
                let demand = Demand::from_requirements(&alt.requirements);
                alternatives.push(AlternativeAvailability {
                    group_id: group.id,
                    alternative_id: alt.id,
                    availability: evaluate_demand(&demand, resolver),
                });
            }
        }
    }

    UnitEvaluation {
        availability: outcome.availability,
        selection: outcome.selection,
        alternatives,
        evaluated: outcome.evaluated,
        truncated: outcome.truncated,
    }
}
