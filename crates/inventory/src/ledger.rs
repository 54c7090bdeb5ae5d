//! Ledger entries and the fulfilment-order view over them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{Entity, LedgerEntryId, Quantity, Readiness, ReadinessOrder};

/// One signed stock movement ("deposit").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    /// Insertion order within the item; breaks ties between equal readiness.
    pub sequence: u64,
    pub quantity: Quantity,
    pub readiness: Readiness,
    pub recorded_at: DateTime<Utc>,
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl LedgerEntry {
    pub fn shipping_time(&self) -> Option<u32> {
        self.readiness.shipping_time()
    }

    pub fn shipping_date(&self) -> Option<DateTime<Utc>> {
        self.readiness.shipping_date()
    }
}

/// Current stock level of an item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "quantity")]
pub enum StockLevel {
    Finite(Quantity),
    Unlimited,
}

impl StockLevel {
    pub fn covers(&self, required: Quantity) -> bool {
        match self {
            StockLevel::Unlimited => true,
            StockLevel::Finite(q) => *q >= required,
        }
    }
}

/// Net quantity of all entries sharing one readiness.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessBucket {
    pub readiness: Readiness,
    pub quantity: Quantity,
}

/// Entries sorted into expected fulfilment order.
///
/// Sorted by readiness under `order`, then by insertion sequence. The sort is
/// stable so equal keys keep ledger order.
pub fn fulfilment_order<'a>(entries: &'a [LedgerEntry], order: &ReadinessOrder) -> Vec<&'a LedgerEntry> {
    let mut sorted: Vec<&LedgerEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        order
            .compare(&a.readiness, &b.readiness)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    sorted
}

/// Net quantity per readiness, in fulfilment order.
///
/// Withdrawals are recorded with the readiness of the stock they drew from, so
/// netting per bucket attributes consumption to the right batch.
pub fn buckets(entries: &[LedgerEntry], order: &ReadinessOrder) -> Vec<ReadinessBucket> {
    let mut out: Vec<ReadinessBucket> = Vec::new();
    for entry in fulfilment_order(entries, order) {
        match out.iter_mut().find(|b| b.readiness == entry.readiness) {
            Some(bucket) => bucket.quantity += entry.quantity,
            None => out.push(ReadinessBucket {
                readiness: entry.readiness,
                quantity: entry.quantity,
            }),
        }
    }
    out
}

/// Deterministic id for the `index`-th entry written by one withdrawal.
pub(crate) fn allocation_entry_id(base: LedgerEntryId, index: usize) -> LedgerEntryId {
    if index == 0 {
        return base;
    }
    let raw = base.as_uuid().as_u128().wrapping_add(index as u128);
    LedgerEntryId::from_uuid(Uuid::from_u128(raw))
}
