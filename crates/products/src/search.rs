//! Combination search over select-one groups.
//!
//! Enumerates the Cartesian product of candidates with an explicit stack
//! (depth = number of groups, never recursion). Two monotonicity facts keep
//! the walk small:
//!
//! - adding demand never makes an item sooner or more available, so an
//!   infeasible partial combination prunes its whole subtree;
//! - a unit's readiness is the latest of its items, so a partial combination
//!   already no sooner than the best complete one can be dropped.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use stockflow_core::{AlternativeId, Quantity, Readiness, ReadinessComparison, ReadinessOrder, StockItemId};
use stockflow_inventory::{Availability, StockItem, resolve};

use crate::requirements::{Demand, RequirementSet};

/// Resolves one item at one quantity.
pub trait ItemResolver {
    fn resolve(&self, item_id: StockItemId, required: Quantity) -> Availability;

    fn order(&self) -> &ReadinessOrder;
}

/// Resolver over preloaded items, memoized per `(item, quantity)`.
///
/// Lives for one recomputation pass; every combination referencing the same
/// item at the same quantity reuses the first answer.
#[derive(Debug)]
pub struct MemoizedResolver<'a> {
    items: &'a HashMap<StockItemId, StockItem>,
    order: ReadinessOrder,
    memo: RefCell<HashMap<(StockItemId, Quantity), Availability>>,
    misses: Cell<usize>,
}

impl<'a> MemoizedResolver<'a> {
    pub fn new(items: &'a HashMap<StockItemId, StockItem>, order: ReadinessOrder) -> Self {
        Self {
            items,
            order,
            memo: RefCell::new(HashMap::new()),
            misses: Cell::new(0),
        }
    }

    /// Number of resolutions actually computed (cache misses).
    pub fn resolutions(&self) -> usize {
        self.misses.get()
    }
}

impl ItemResolver for MemoizedResolver<'_> {
    fn resolve(&self, item_id: StockItemId, required: Quantity) -> Availability {
        if let Some(hit) = self.memo.borrow().get(&(item_id, required)) {
            return *hit;
        }

        self.misses.set(self.misses.get() + 1);
        // A missing item (deleted or never created) supplies nothing.
        let result = match self.items.get(&item_id) {
            Some(item) => resolve(item, required, &self.order),
            None if required.is_positive() => Availability::unavailable(),
            None => Availability::available(Readiness::Immediate),
        };
        self.memo.borrow_mut().insert((item_id, required), result);
        result
    }

    fn order(&self) -> &ReadinessOrder {
        &self.order
    }
}

/// Availability of a merged demand: every item available, readiness = latest.
pub fn evaluate_demand<R: ItemResolver + ?Sized>(demand: &Demand, resolver: &R) -> Availability {
    let order = *resolver.order();
    let mut readiness = Readiness::Immediate;
    for (item_id, quantity) in demand.items() {
        match resolver.resolve(item_id, quantity).readiness() {
            Some(r) => readiness = order.latest(readiness, r),
            None => return Availability::unavailable(),
        }
    }
    Availability::available(readiness)
}

/// Bounds on one search.
///
/// Exhausting the budget keeps the best combination found so far and sets
/// `truncated`. If none was complete yet, the result is "unavailable" even
/// though a feasible combination may exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLimits {
    /// Maximum number of partial combinations evaluated.
    pub max_nodes: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self { max_nodes: 100_000 }
    }
}

/// Result of a combination search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub availability: Availability,
    /// Chosen alternative per required group, in group order (empty when unavailable).
    pub selection: Vec<AlternativeId>,
    /// Partial combinations evaluated.
    pub evaluated: usize,
    /// The node budget ran out; `availability` is the best found so far.
    pub truncated: bool,
}

impl SearchOutcome {
    fn unavailable(evaluated: usize, truncated: bool) -> Self {
        Self {
            availability: Availability::unavailable(),
            selection: Vec::new(),
            evaluated,
            truncated,
        }
    }
}

struct Frame {
    demand: Demand,
    readiness: Readiness,
    next: usize,
}

/// Find the soonest fully available combination.
///
/// Ties go to the combination met first in enumeration order (groups in
/// order, candidates in order).
pub fn best_available_combination<R: ItemResolver + ?Sized>(
    set: &RequirementSet,
    resolver: &R,
    limits: &SearchLimits,
) -> SearchOutcome {
    let order = *resolver.order();

    let Some(base) = evaluate_demand(set.fixed(), resolver).readiness() else {
        return SearchOutcome::unavailable(0, false);
    };
    if set.has_empty_choice() {
        return SearchOutcome::unavailable(0, false);
    }

    // Candidates infeasible next to the fixed demand alone are infeasible in
    // every combination.
    let mut evaluated = 0usize;
    let mut groups: Vec<Vec<(AlternativeId, &Demand)>> = Vec::with_capacity(set.choices().len());
    for choice in set.choices() {
        let feasible: Vec<(AlternativeId, &Demand)> = choice
            .candidates
            .iter()
            .filter(|c| {
                evaluated += 1;
                evaluate_demand(&set.fixed().merged_with(&c.demand), resolver).is_available()
            })
            .map(|c| (c.alternative_id, &c.demand))
            .collect();
        if feasible.is_empty() {
            return SearchOutcome::unavailable(evaluated, false);
        }
        groups.push(feasible);
    }

    let can_stop_at_immediate = order.comparison() == ReadinessComparison::Lexical;
    let mut best: Option<(Readiness, Vec<usize>)> = None;
    let mut path: Vec<usize> = Vec::with_capacity(groups.len());
    let mut stack = vec![Frame {
        demand: set.fixed().clone(),
        readiness: base,
        next: 0,
    }];
    let mut truncated = false;

    while let Some(depth) = stack.len().checked_sub(1) {
        if depth == groups.len() {
            let readiness = stack[depth].readiness;
            if best.as_ref().is_none_or(|(b, _)| order.is_sooner(&readiness, b)) {
                best = Some((readiness, path.clone()));
            }
            if can_stop_at_immediate && readiness.is_immediate() {
                break;
            }
            stack.pop();
            path.truncate(stack.len().saturating_sub(1));
            continue;
        }

        let idx = stack[depth].next;
        let Some((_, candidate)) = groups[depth].get(idx) else {
            stack.pop();
            path.truncate(stack.len().saturating_sub(1));
            continue;
        };
        stack[depth].next += 1;

        if evaluated >= limits.max_nodes {
            truncated = true;
            break;
        }
        evaluated += 1;

        let demand = stack[depth].demand.merged_with(candidate);
        let Some(readiness) = evaluate_demand(&demand, resolver).readiness() else {
            continue;
        };
        if let Some((b, _)) = &best {
            if !order.is_sooner(&readiness, b) {
                continue;
            }
        }

        path.push(idx);
        stack.push(Frame {
            demand,
            readiness,
            next: 0,
        });
    }

    if truncated {
        warn!(
            evaluated,
            max_nodes = limits.max_nodes,
            found = best.is_some(),
            "combination search budget exhausted"
        );
    }

    match best {
        Some((readiness, picks)) => SearchOutcome {
            availability: Availability::available(readiness),
            selection: picks
                .iter()
                .enumerate()
                .map(|(depth, idx)| groups[depth][*idx].0)
                .collect(),
            evaluated,
            truncated,
        },
        None => SearchOutcome::unavailable(evaluated, truncated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::{Candidate, ChoiceGroup};
    use stockflow_core::RequirementGroupId;

    /// Resolver over a fixed table: item → (stock, readiness). Counts calls.
    struct TableResolver {
        table: HashMap<StockItemId, (i64, Readiness)>,
        order: ReadinessOrder,
        calls: Cell<usize>,
    }

    impl TableResolver {
        fn new(rows: &[(StockItemId, i64, Readiness)]) -> Self {
            Self {
                table: rows.iter().map(|(id, q, r)| (*id, (*q, *r))).collect(),
                order: ReadinessOrder::lexical(),
                calls: Cell::new(0),
            }
        }
    }

    impl ItemResolver for TableResolver {
        fn resolve(&self, item_id: StockItemId, required: Quantity) -> Availability {
            self.calls.set(self.calls.get() + 1);
            match self.table.get(&item_id) {
                Some((stock, r)) if Quantity::units(*stock) >= required => Availability::available(*r),
                _ => Availability::unavailable(),
            }
        }

        fn order(&self) -> &ReadinessOrder {
            &self.order
        }
    }

    fn demand(rows: &[(StockItemId, i64)]) -> Demand {
        let mut d = Demand::new();
        for (id, q) in rows {
            d.add(*id, Quantity::units(*q));
        }
        d
    }

    fn choice(alternatives: Vec<Demand>) -> (ChoiceGroup, Vec<AlternativeId>) {
        let ids: Vec<AlternativeId> = alternatives.iter().map(|_| AlternativeId::new()).collect();
        let candidates = ids
            .iter()
            .zip(alternatives)
            .map(|(id, demand)| Candidate { alternative_id: *id, demand })
            .collect();
        (
            ChoiceGroup {
                group_id: RequirementGroupId::new(),
                candidates,
            },
            ids,
        )
    }

    #[test]
    fn fixed_only_unit_takes_latest_component() {
        let x = StockItemId::new();
        let y = StockItemId::new();
        let resolver = TableResolver::new(&[(x, 5, Readiness::Days(4)), (y, 5, Readiness::Days(6))]);
        let set = RequirementSet::new(demand(&[(x, 1), (y, 1)]), vec![]);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());

        assert_eq!(outcome.availability, Availability::available(Readiness::Days(6)));
        assert!(outcome.selection.is_empty());
    }

    #[test]
    fn picks_soonest_feasible_combination() {
        let slow = StockItemId::new();
        let fast = StockItemId::new();
        let missing = StockItemId::new();
        let resolver = TableResolver::new(&[
            (slow, 5, Readiness::Days(10)),
            (fast, 5, Readiness::Days(2)),
        ]);
        let (group, ids) = choice(vec![
            demand(&[(missing, 1)]),
            demand(&[(slow, 1)]),
            demand(&[(fast, 1)]),
        ]);
        let set = RequirementSet::new(Demand::new(), vec![group]);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());

        assert_eq!(outcome.availability, Availability::available(Readiness::Days(2)));
        assert_eq!(outcome.selection, vec![ids[2]]);
    }

    #[test]
    fn ties_go_to_the_first_combination() {
        let a = StockItemId::new();
        let b = StockItemId::new();
        let resolver = TableResolver::new(&[(a, 5, Readiness::Days(3)), (b, 5, Readiness::Days(3))]);
        let (group, ids) = choice(vec![demand(&[(a, 1)]), demand(&[(b, 1)])]);
        let set = RequirementSet::new(Demand::new(), vec![group]);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());

        assert_eq!(outcome.selection, vec![ids[0]]);
    }

    #[test]
    fn shared_item_demand_is_combined_across_groups() {
        let shared = StockItemId::new();
        let other = StockItemId::new();
        // Two units of `shared` in stock: picking it in both groups needs 3.
        let resolver = TableResolver::new(&[(shared, 2, Readiness::Immediate), (other, 1, Readiness::Days(5))]);
        let (g1, ids1) = choice(vec![demand(&[(shared, 2)])]);
        let (g2, ids2) = choice(vec![demand(&[(shared, 1)]), demand(&[(other, 1)])]);
        let set = RequirementSet::new(Demand::new(), vec![g1, g2]);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());

        assert_eq!(outcome.availability, Availability::available(Readiness::Days(5)));
        assert_eq!(outcome.selection, vec![ids1[0], ids2[1]]);
    }

    #[test]
    fn unavailable_when_no_combination_fits() {
        let shared = StockItemId::new();
        let resolver = TableResolver::new(&[(shared, 1, Readiness::Immediate)]);
        let (g1, _) = choice(vec![demand(&[(shared, 1)])]);
        let (g2, _) = choice(vec![demand(&[(shared, 1)])]);
        let set = RequirementSet::new(Demand::new(), vec![g1, g2]);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());

        assert!(!outcome.availability.is_available());
        assert!(outcome.selection.is_empty());
        assert_eq!(outcome.availability.shipping_time(), None);
    }

    #[test]
    fn empty_required_group_is_unavailable() {
        let resolver = TableResolver::new(&[]);
        let (group, _) = choice(vec![]);
        let set = RequirementSet::new(Demand::new(), vec![group]);

        assert!(!best_available_combination(&set, &resolver, &SearchLimits::default()).availability.is_available());
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        let items: Vec<StockItemId> = (0..6).map(|_| StockItemId::new()).collect();
        let rows: Vec<(StockItemId, i64, Readiness)> =
            items.iter().enumerate().map(|(i, id)| (*id, 10, Readiness::Days(10 - i as u32))).collect();
        let resolver = TableResolver::new(&rows);
        let groups = (0..3)
            .map(|_| choice(items.iter().map(|id| demand(&[(*id, 1)])).collect()).0)
            .collect();
        let set = RequirementSet::new(Demand::new(), groups);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits { max_nodes: 20 });

        assert!(outcome.truncated);
        assert!(outcome.evaluated <= 20);
    }

    #[test]
    fn exhausted_budget_before_any_leaf_reports_unavailable() {
        let item = StockItemId::new();
        let resolver = TableResolver::new(&[(item, 10, Readiness::Immediate)]);
        let groups = (0..3).map(|_| choice(vec![demand(&[(item, 1)])]).0).collect();
        let set = RequirementSet::new(Demand::new(), groups);

        let outcome = best_available_combination(&set, &resolver, &SearchLimits { max_nodes: 2 });

        assert!(outcome.truncated);
        assert!(!outcome.availability.is_available());
        assert!(outcome.selection.is_empty());
    }

    #[test]
    fn memoized_resolver_computes_each_pair_once() {
        let items: HashMap<StockItemId, StockItem> = HashMap::new();
        let resolver = MemoizedResolver::new(&items, ReadinessOrder::lexical());
        let id = StockItemId::new();

        for _ in 0..10 {
            assert!(!resolver.resolve(id, Quantity::units(1)).is_available());
        }
        assert!(resolver.resolve(id, Quantity::ZERO).is_available());
        assert_eq!(resolver.resolutions(), 2);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Exhaustive reference: every combination, soonest wins, first on ties.
        fn brute_force(set: &RequirementSet, resolver: &TableResolver) -> Availability {
            let mut best: Option<Readiness> = None;
            let mut indices = vec![0usize; set.choices().len()];
            loop {
                let mut d = set.fixed().clone();
                for (g, i) in indices.iter().enumerate() {
                    d.merge(&set.choices()[g].candidates[*i].demand);
                }
                if let Some(r) = evaluate_demand(&d, resolver).readiness() {
                    if best.is_none_or(|b| r < b) {
                        best = Some(r);
                    }
                }
                // Odometer increment.
                let mut g = 0;
                loop {
                    if g == indices.len() {
                        return best.map_or(Availability::unavailable(), Availability::available);
                    }
                    indices[g] += 1;
                    if indices[g] < set.choices()[g].candidates.len() {
                        break;
                    }
                    indices[g] = 0;
                    g += 1;
                }
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 300,
                ..ProptestConfig::default()
            })]

            /// Property: pruned search agrees with exhaustive enumeration.
            #[test]
            fn search_matches_brute_force(
                stock in prop::collection::vec((0i64..4, 0u32..5), 4),
                shape in prop::collection::vec(prop::collection::vec((0usize..4, 1i64..3), 1..4), 1..4),
            ) {
                let items: Vec<StockItemId> = (0..4).map(|_| StockItemId::new()).collect();
                let rows: Vec<(StockItemId, i64, Readiness)> = items
                    .iter()
                    .zip(&stock)
                    .map(|(id, (q, d))| (*id, *q, if *d == 0 { Readiness::Immediate } else { Readiness::Days(*d) }))
                    .collect();
                let resolver = TableResolver::new(&rows);

                let groups = shape
                    .iter()
                    .map(|alts| choice(alts.iter().map(|(i, q)| demand(&[(items[*i], *q)])).collect()).0)
                    .collect();
                let set = RequirementSet::new(Demand::new(), groups);

                let outcome = best_available_combination(&set, &resolver, &SearchLimits::default());
                prop_assert_eq!(outcome.availability, brute_force(&set, &resolver));
                prop_assert!(!outcome.truncated);
            }
        }
    }
}
