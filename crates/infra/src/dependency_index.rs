//! Reverse index: stock item → products depending on it.
//!
//! Disposable read model, rebuilt from product state. Every structural change
//! to a product re-indexes that product as a whole; a ledger change on an item
//! looks up its dependents here instead of scanning products.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use stockflow_core::{ProductId, StockItemId};

#[derive(Debug, Default)]
struct Maps {
    by_item: HashMap<StockItemId, BTreeSet<ProductId>>,
    by_unit: HashMap<ProductId, BTreeSet<StockItemId>>,
}

#[derive(Debug, Default)]
pub struct DependencyIndex {
    inner: RwLock<Maps>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the item set of `unit`.
    pub fn reindex(&self, unit: ProductId, items: BTreeSet<StockItemId>) {
        let mut maps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = maps.by_unit.remove(&unit).unwrap_or_default();
        for item in previous.difference(&items) {
            detach(&mut maps.by_item, *item, unit);
        }
        for item in &items {
            maps.by_item.entry(*item).or_default().insert(unit);
        }
        if !items.is_empty() {
            maps.by_unit.insert(unit, items);
        }
    }

    pub fn remove_unit(&self, unit: ProductId) {
        let mut maps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(items) = maps.by_unit.remove(&unit) {
            for item in items {
                detach(&mut maps.by_item, item, unit);
            }
        }
    }

    /// Units depending on any of `items`, deduplicated and sorted.
    pub fn dependents<I>(&self, items: I) -> BTreeSet<ProductId>
    where
        I: IntoIterator<Item = StockItemId>,
    {
        let maps = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        items
            .into_iter()
            .filter_map(|item| maps.by_item.get(&item))
            .flatten()
            .copied()
            .collect()
    }

    pub fn items_of(&self, unit: ProductId) -> BTreeSet<StockItemId> {
        let maps = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        maps.by_unit.get(&unit).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut maps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *maps = Maps::default();
    }
}

fn detach(by_item: &mut HashMap<StockItemId, BTreeSet<ProductId>>, item: StockItemId, unit: ProductId) {
    if let Some(units) = by_item.get_mut(&item) {
        units.remove(&unit);
        if units.is_empty() {
            by_item.remove(&item);
        }
    }
}
