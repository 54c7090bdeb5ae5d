//! Item availability resolver.
//!
//! Answers: can this item supply `required` units, and what is the soonest
//! readiness at which it can?

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Quantity, Readiness, ReadinessOrder};

use crate::item::StockItem;
use crate::ledger::buckets;

/// Availability of an item, a combination, or a unit.
///
/// `None` means unavailable; both shipping fields are then null.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Availability(Option<Readiness>);

impl Availability {
    pub fn available(readiness: Readiness) -> Self {
        Self(Some(readiness))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }

    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }

    pub fn readiness(&self) -> Option<Readiness> {
        self.0
    }

    pub fn shipping_time(&self) -> Option<u32> {
        self.0.and_then(|r| r.shipping_time())
    }

    pub fn shipping_date(&self) -> Option<DateTime<Utc>> {
        self.0.and_then(|r| r.shipping_date())
    }
}

/// Resolve `item` at `required` units.
///
/// - Non-positive `required` is trivially available and immediate.
/// - Unlimited-stock items are always available at their override readiness.
/// - Otherwise entries are netted per readiness in fulfilment order. With
///   prefix sums `P_0..P_n`, the item is available iff `P_n >= required`, and
///   its readiness is that of the first bucket `k` where every later prefix
///   stays at or above `required` (supply never dips below demand again).
pub fn resolve(item: &StockItem, required: Quantity, order: &ReadinessOrder) -> Availability {
    if !required.is_positive() {
        return Availability::available(Readiness::Immediate);
    }

    if let Some(unlimited) = item.unlimited() {
        return Availability::available(unlimited.readiness());
    }

    let buckets = buckets(item.entries(), order);

    let mut prefix = Vec::with_capacity(buckets.len());
    let mut running = Quantity::ZERO;
    for bucket in &buckets {
        running += bucket.quantity;
        prefix.push(running);
    }

    if running < required {
        return Availability::unavailable();
    }

    // Walk backwards tracking the minimum of the remaining prefixes; the last
    // index where that minimum still covers demand (scanning from the end) is
    // the first index in forward order.
    let mut suffix_min = running;
    let mut answer = buckets.len() - 1;
    for k in (0..prefix.len()).rev() {
        suffix_min = suffix_min.min(prefix[k]);
        if suffix_min >= required {
            answer = k;
        } else {
            break;
        }
    }

    Availability::available(buckets[answer].readiness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stockflow_core::{Aggregate, LedgerEntryId, StockItemId, UnlimitedStock};

    use crate::item::{CreateItem, RecordEntry, StockItemCommand};

    fn item_with(entries: &[(i64, Option<u32>, Option<DateTime<Utc>>)]) -> StockItem {
        let id = StockItemId::new();
        let mut item = StockItem::empty(id);
        let created = item
            .handle(&StockItemCommand::CreateItem(CreateItem {
                item_id: id,
                sku: "SKU".to_string(),
                name: "Item".to_string(),
                unlimited: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        item.apply(&created[0]);

        for (qty, time, date) in entries {
            let events = item
                .handle(&StockItemCommand::RecordEntry(RecordEntry {
                    item_id: id,
                    entry_id: LedgerEntryId::new(),
                    quantity: Quantity::units(*qty),
                    shipping_time: *time,
                    shipping_date: *date,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            item.apply(&events[0]);
        }
        item
    }

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn consumes_batches_in_readiness_order() {
        // 6 days for 2, then 4 days for 2: three units need both batches.
        let item = item_with(&[(2, Some(6), None), (2, Some(4), None)]);
        let order = ReadinessOrder::lexical();

        assert_eq!(resolve(&item, Quantity::units(1), &order), Availability::available(Readiness::Days(4)));
        assert_eq!(resolve(&item, Quantity::units(2), &order), Availability::available(Readiness::Days(4)));
        assert_eq!(resolve(&item, Quantity::units(3), &order).shipping_time(), Some(6));
        assert!(!resolve(&item, Quantity::units(5), &order).is_available());
    }

    #[test]
    fn immediate_stock_is_used_before_dated_stock() {
        let item = item_with(&[(1, None, Some(date(20))), (1, None, None)]);
        let order = ReadinessOrder::lexical();

        assert_eq!(resolve(&item, Quantity::units(1), &order), Availability::available(Readiness::Immediate));
        assert_eq!(resolve(&item, Quantity::units(2), &order).shipping_date(), Some(date(20)));
    }

    #[test]
    fn consumption_reduces_supply() {
        let item = item_with(&[(3, None, None), (-2, None, None), (4, Some(2), None)]);
        let order = ReadinessOrder::lexical();

        assert_eq!(resolve(&item, Quantity::units(1), &order), Availability::available(Readiness::Immediate));
        assert_eq!(resolve(&item, Quantity::units(2), &order), Availability::available(Readiness::Days(2)));
        assert_eq!(resolve(&item, Quantity::units(5), &order), Availability::available(Readiness::Days(2)));
        assert!(!resolve(&item, Quantity::units(6), &order).is_available());
    }

    #[test]
    fn later_deficit_pushes_readiness_out() {
        // Immediate +5, but a 3-day batch was over-consumed by 4.
        let item = item_with(&[(5, None, None), (-4, Some(3), None), (10, None, Some(date(1)))]);
        let order = ReadinessOrder::lexical();

        // P = [5, 1, 11]; for 2 units supply dips to 1 at the 3-day bucket.
        assert_eq!(resolve(&item, Quantity::units(1), &order), Availability::available(Readiness::Immediate));
        assert_eq!(resolve(&item, Quantity::units(2), &order).shipping_date(), Some(date(1)));
    }

    #[test]
    fn negative_total_is_unavailable() {
        let item = item_with(&[(-1, None, None)]);
        let a = resolve(&item, Quantity::units(1), &ReadinessOrder::lexical());
        assert!(!a.is_available());
        assert_eq!(a.shipping_time(), None);
        assert_eq!(a.shipping_date(), None);
    }

    #[test]
    fn non_positive_requirement_is_trivially_available() {
        let item = item_with(&[]);
        let order = ReadinessOrder::lexical();
        assert_eq!(resolve(&item, Quantity::ZERO, &order), Availability::available(Readiness::Immediate));
        assert_eq!(resolve(&item, Quantity::units(-3), &order), Availability::available(Readiness::Immediate));
    }

    #[test]
    fn fractional_quantities_do_not_drift() {
        let mut item = item_with(&[]);
        for _ in 0..10 {
            let events = item
                .handle(&StockItemCommand::RecordEntry(RecordEntry {
                    item_id: item.id_typed(),
                    entry_id: LedgerEntryId::new(),
                    quantity: "0.1".parse().unwrap(),
                    shipping_time: None,
                    shipping_date: None,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            item.apply(&events[0]);
        }
        assert!(resolve(&item, Quantity::units(1), &ReadinessOrder::lexical()).is_available());
    }

    #[test]
    fn unlimited_stock_ignores_the_ledger() {
        let id = StockItemId::new();
        let mut item = StockItem::empty(id);
        let events = item
            .handle(&StockItemCommand::CreateItem(CreateItem {
                item_id: id,
                sku: "U".to_string(),
                name: "Unlimited".to_string(),
                unlimited: Some(UnlimitedStock::ShippingTime(9)),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        item.apply(&events[0]);

        let a = resolve(&item, Quantity::units(1_000_000), &ReadinessOrder::lexical());
        assert_eq!(a, Availability::available(Readiness::Days(9)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn entry_strategy() -> impl Strategy<Value = (i64, Option<u32>, Option<DateTime<Utc>>)> {
            (
                -5i64..20,
                prop_oneof![Just(None), (0u32..10).prop_map(Some)],
                prop_oneof![Just(None), (1u32..28).prop_map(|d| Some(date(d)))],
            )
                .prop_map(|(q, t, d)| if t.is_some() { (q, t, None) } else { (q, None, d) })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: more demand is never sooner and never more available.
            #[test]
            fn resolution_is_monotone_in_demand(
                entries in prop::collection::vec(entry_strategy(), 0..12),
                a in 1i64..30,
                b in 1i64..30,
            ) {
                let item = item_with(&entries);
                let order = ReadinessOrder::lexical();
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

                let small = resolve(&item, Quantity::units(lo), &order);
                let large = resolve(&item, Quantity::units(hi), &order);

                if large.is_available() {
                    prop_assert!(small.is_available());
                    prop_assert!(small.readiness() <= large.readiness());
                }
            }

            /// Property: availability matches the ledger total.
            #[test]
            fn availability_matches_total(
                entries in prop::collection::vec(entry_strategy(), 0..12),
                q in 1i64..30,
            ) {
                let item = item_with(&entries);
                let total: i64 = entries.iter().map(|(q, _, _)| *q).sum();
                let a = resolve(&item, Quantity::units(q), &ReadinessOrder::lexical());
                prop_assert_eq!(a.is_available(), total >= q);
                prop_assert!(a.shipping_time().is_none() || a.shipping_date().is_none());
            }
        }
    }
}
