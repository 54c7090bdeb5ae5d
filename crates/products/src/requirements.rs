//! Requirement set evaluator: product structure → per-item demand.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use stockflow_core::{AlternativeId, Quantity, RequirementGroupId, StockItemId};

use crate::product::{GroupKind, Product, Requirement};

/// Per-item summed quantity for one purchase.
///
/// The same item reached through several groups is evaluated on the combined
/// quantity, never per group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Demand {
    items: BTreeMap<StockItemId, Quantity>,
}

impl Demand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_requirements(requirements: &[Requirement]) -> Self {
        let mut demand = Self::new();
        for r in requirements {
            demand.add(r.item_id, r.quantity);
        }
        demand
    }

    pub fn add(&mut self, item_id: StockItemId, quantity: Quantity) {
        *self.items.entry(item_id).or_insert(Quantity::ZERO) += quantity;
    }

    pub fn merge(&mut self, other: &Demand) {
        for (item_id, quantity) in &other.items {
            self.add(*item_id, *quantity);
        }
    }

    pub fn merged_with(&self, other: &Demand) -> Demand {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    pub fn get(&self, item_id: &StockItemId) -> Quantity {
        self.items.get(item_id).copied().unwrap_or(Quantity::ZERO)
    }

    /// `(item, quantity)` pairs in item-id order.
    pub fn items(&self) -> impl Iterator<Item = (StockItemId, Quantity)> + '_ {
        self.items.iter().map(|(id, q)| (*id, *q))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One alternative reduced to its demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub alternative_id: AlternativeId,
    pub demand: Demand,
}

/// A required select-one group: exactly one candidate must be satisfiable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceGroup {
    pub group_id: RequirementGroupId,
    pub candidates: Vec<Candidate>,
}

/// Everything a product needs, split into fixed demand and choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    fixed: Demand,
    choices: Vec<ChoiceGroup>,
}

impl RequirementSet {
    pub fn new(fixed: Demand, choices: Vec<ChoiceGroup>) -> Self {
        Self { fixed, choices }
    }

    /// Build from a product's groups.
    ///
    /// - `AllOf` groups are flattened into the fixed demand.
    /// - Required `SelectOne` groups become choice groups (in group order);
    ///   alternatives with an identical demand collapse onto the first one.
    /// - Optional `SelectOne` groups are skipped.
    pub fn from_product(product: &Product) -> Self {
        let mut fixed = Demand::new();
        let mut choices = Vec::new();

        for group in product.groups() {
            match &group.kind {
                GroupKind::AllOf { requirements } => {
                    fixed.merge(&Demand::from_requirements(requirements));
                }
                GroupKind::SelectOne { required: false, .. } => {}
                GroupKind::SelectOne { required: true, alternatives } => {
                    let mut candidates: Vec<Candidate> = Vec::with_capacity(alternatives.len());
                    for alt in alternatives {
                        let demand = Demand::from_requirements(&alt.requirements);
                        if candidates.iter().any(|c| c.demand == demand) {
                            continue;
                        }
                        candidates.push(Candidate {
                            alternative_id: alt.id,
                            demand,
                        });
                    }
                    choices.push(ChoiceGroup {
                        group_id: group.id,
                        candidates,
                    });
                }
            }
        }

        Self { fixed, choices }
    }

    pub fn fixed(&self) -> &Demand {
        &self.fixed
    }

    pub fn choices(&self) -> &[ChoiceGroup] {
        &self.choices
    }

    /// Fixed `(item, quantity)` list of the always-required groups.
    pub fn required_quantities(&self) -> Vec<(StockItemId, Quantity)> {
        self.fixed.items().collect()
    }

    /// Every distinct item the set can touch.
    pub fn item_ids(&self) -> BTreeSet<StockItemId> {
        let mut ids: BTreeSet<StockItemId> = self.fixed.items().map(|(id, _)| id).collect();
        for choice in &self.choices {
            for candidate in &choice.candidates {
                ids.extend(candidate.demand.items().map(|(id, _)| id));
            }
        }
        ids
    }

    /// A required group without any alternative can never be satisfied.
    pub fn has_empty_choice(&self) -> bool {
        self.choices.iter().any(|c| c.candidates.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::ProductId;

    use crate::product::{
        AddAlternative, AddGroup, AttachRequirement, CreateProduct, GroupSpec, ProductCommand,
        RequirementTarget,
    };
    use chrono::Utc;
    use stockflow_events::execute;

    struct Builder {
        product: Product,
    }

    impl Builder {
        fn new() -> Self {
            let id = ProductId::new();
            let mut product = Product::empty(id);
            execute(
                &mut product,
                &ProductCommand::CreateProduct(CreateProduct {
                    product_id: id,
                    name: "Desk".to_string(),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            Self { product }
        }

        fn group(&mut self, spec: GroupSpec) -> RequirementGroupId {
            let group_id = RequirementGroupId::new();
            let product_id = self.product.id_typed();
            execute(
                &mut self.product,
                &ProductCommand::AddGroup(AddGroup {
                    product_id,
                    group_id,
                    name: "g".to_string(),
                    spec,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            group_id
        }

        fn alternative(&mut self, group_id: RequirementGroupId, reqs: &[(StockItemId, i64)]) -> AlternativeId {
            let alternative_id = AlternativeId::new();
            let product_id = self.product.id_typed();
            execute(
                &mut self.product,
                &ProductCommand::AddAlternative(AddAlternative {
                    product_id,
                    group_id,
                    alternative_id,
                    name: "opt".to_string(),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            for (item, qty) in reqs {
                self.attach(RequirementTarget::Alternative(alternative_id), *item, *qty);
            }
            alternative_id
        }

        fn attach(&mut self, target: RequirementTarget, item_id: StockItemId, qty: i64) {
            let product_id = self.product.id_typed();
            execute(
                &mut self.product,
                &ProductCommand::AttachRequirement(AttachRequirement {
                    product_id,
                    target,
                    item_id,
                    quantity: Quantity::units(qty),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
    }

    #[test]
    fn fixed_groups_are_summed_per_item() {
        let mut b = Builder::new();
        let frame = StockItemId::new();
        let legs = StockItemId::new();
        let g1 = b.group(GroupSpec::AllOf);
        let g2 = b.group(GroupSpec::AllOf);
        b.attach(RequirementTarget::Group(g1), frame, 1);
        b.attach(RequirementTarget::Group(g1), legs, 4);
        b.attach(RequirementTarget::Group(g2), legs, 2);

        let set = RequirementSet::from_product(&b.product);

        assert_eq!(set.fixed().get(&frame), Quantity::units(1));
        assert_eq!(set.fixed().get(&legs), Quantity::units(6));
        assert!(set.choices().is_empty());
    }

    #[test]
    fn optional_groups_do_not_gate() {
        let mut b = Builder::new();
        let g = b.group(GroupSpec::SelectOne { required: false });
        b.alternative(g, &[(StockItemId::new(), 1)]);

        let set = RequirementSet::from_product(&b.product);

        assert!(set.choices().is_empty());
        assert!(set.item_ids().is_empty());
    }

    #[test]
    fn identical_alternatives_collapse_onto_the_first() {
        let mut b = Builder::new();
        let shared = StockItemId::new();
        let g = b.group(GroupSpec::SelectOne { required: true });
        let first = b.alternative(g, &[(shared, 1)]);
        b.alternative(g, &[(shared, 1)]);
        let other = b.alternative(g, &[(shared, 2)]);

        let set = RequirementSet::from_product(&b.product);

        let ids: Vec<AlternativeId> = set.choices()[0].candidates.iter().map(|c| c.alternative_id).collect();
        assert_eq!(ids, vec![first, other]);
    }

    #[test]
    fn empty_required_group_is_flagged() {
        let mut b = Builder::new();
        b.group(GroupSpec::SelectOne { required: true });

        assert!(RequirementSet::from_product(&b.product).has_empty_choice());
    }

    #[test]
    fn demand_merge_sums_shared_items() {
        let shared = StockItemId::new();
        let a = Demand::from_requirements(&[Requirement { item_id: shared, quantity: Quantity::units(1) }]);
        let b = Demand::from_requirements(&[Requirement { item_id: shared, quantity: "1.5".parse().unwrap() }]);

        assert_eq!(a.merged_with(&b).get(&shared), "2.5".parse::<Quantity>().unwrap());
        assert_eq!(a.merged_with(&b).len(), 1);
    }
}
