use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use stockflow_core::{AggregateRoot, ExpectedVersion, ProductId, StockItemId};
use stockflow_inventory::StockItem;
use stockflow_products::Product;

use super::{AvailabilityCacheStore, ProductStore, StockItemStore};
use crate::cache_updater::AvailabilityRecord;
use crate::error::StoreError;

/// In-memory backend for tests, benchmarks and single-process embedding.
///
/// Counts every trait call as one round trip so callers can assert the query
/// cost of an operation.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<StockItemId, StockItem>>,
    products: RwLock<HashMap<ProductId, Product>>,
    cache: RwLock<HashMap<ProductId, AvailabilityRecord>>,
    round_trips: AtomicU64,
    reject_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round trips served since creation or the last reset.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    /// Make every write fail with `StoreError::Unavailable` (outage simulation).
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn trip(&self) {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes rejected".to_string()));
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn check_version(
    kind: &str,
    stored: Option<u64>,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let actual = stored.unwrap_or(0);
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "{kind} version mismatch (expected: {expected:?}, actual: {actual})"
        )))
    }
}

impl StockItemStore for InMemoryStore {
    fn load_item(&self, item_id: StockItemId) -> Result<Option<StockItem>, StoreError> {
        self.trip();
        Ok(read(&self.items)?.get(&item_id).cloned())
    }

    fn load_items(
        &self,
        item_ids: &BTreeSet<StockItemId>,
    ) -> Result<HashMap<StockItemId, StockItem>, StoreError> {
        self.trip();
        let items = read(&self.items)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| items.get(id).map(|item| (*id, item.clone())))
            .collect())
    }

    fn save_item(&self, item: StockItem, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.trip();
        self.check_writable()?;
        let mut items = write(&self.items)?;
        let id = item.id_typed();
        check_version("stock item", items.get(&id).map(|i| i.version()), expected)?;
        items.insert(id, item);
        Ok(())
    }

    fn items_with_unlimited_date_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockItemId>, StoreError> {
        self.trip();
        let items = read(&self.items)?;
        let mut ids: Vec<StockItemId> = items
            .values()
            .filter(|item| item.unlimited().is_some_and(|u| u.is_expired(now)))
            .map(StockItem::id_typed)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl ProductStore for InMemoryStore {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        self.trip();
        Ok(read(&self.products)?.get(&product_id).cloned())
    }

    fn save_product(&self, product: Product, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.trip();
        self.check_writable()?;
        let mut products = write(&self.products)?;
        let id = product.id_typed();
        check_version("product", products.get(&id).map(|p| p.version()), expected)?;
        products.insert(id, product);
        Ok(())
    }

    fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
        self.trip();
        let products = read(&self.products)?;
        let mut ids: Vec<ProductId> = products
            .values()
            .filter(|p| p.is_live())
            .map(Product::id_typed)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl AvailabilityCacheStore for InMemoryStore {
    fn get_record(&self, product_id: ProductId) -> Result<Option<AvailabilityRecord>, StoreError> {
        self.trip();
        Ok(read(&self.cache)?.get(&product_id).cloned())
    }

    fn put_record(&self, record: AvailabilityRecord) -> Result<(), StoreError> {
        self.trip();
        self.check_writable()?;
        write(&self.cache)?.insert(record.product_id, record);
        Ok(())
    }

    fn remove_record(&self, product_id: ProductId) -> Result<(), StoreError> {
        self.trip();
        self.check_writable()?;
        write(&self.cache)?.remove(&product_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use stockflow_core::UnlimitedStock;
    use stockflow_events::execute;
    use stockflow_inventory::{CreateItem, StockItemCommand};

    fn item(unlimited: Option<UnlimitedStock>) -> StockItem {
        let id = StockItemId::new();
        let mut item = StockItem::empty(id);
        execute(
            &mut item,
            &StockItemCommand::CreateItem(CreateItem {
                item_id: id,
                sku: "SKU-1".to_string(),
                name: "Bolt".to_string(),
                unlimited,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        item
    }

    #[test]
    fn save_checks_expected_version() {
        let store = InMemoryStore::new();
        let item = item(None);

        store.save_item(item.clone(), ExpectedVersion::Exact(0)).unwrap();
        let err = store.save_item(item.clone(), ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        store.save_item(item, ExpectedVersion::Exact(1)).unwrap();
    }

    #[test]
    fn batch_load_is_one_round_trip_and_skips_unknown_ids() {
        let store = InMemoryStore::new();
        let a = item(None);
        let b = item(None);
        let ids: BTreeSet<StockItemId> = [a.id_typed(), b.id_typed(), StockItemId::new()].into();
        store.save_item(a, ExpectedVersion::Any).unwrap();
        store.save_item(b, ExpectedVersion::Any).unwrap();
        store.reset_round_trips();

        let loaded = store.load_items(&ids).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(store.round_trips(), 1);
    }

    #[test]
    fn finds_only_expired_date_overrides() {
        let store = InMemoryStore::new();
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let expired = item(Some(UnlimitedStock::ShippingDate(now - Duration::days(1))));
        let future = item(Some(UnlimitedStock::ShippingDate(now + Duration::days(1))));
        let timed = item(Some(UnlimitedStock::ShippingTime(3)));
        let expired_id = expired.id_typed();
        for i in [expired, future, timed] {
            store.save_item(i, ExpectedVersion::Any).unwrap();
        }

        assert_eq!(store.items_with_unlimited_date_before(now).unwrap(), vec![expired_id]);
    }

    #[test]
    fn rejected_writes_surface_as_unavailable() {
        let store = InMemoryStore::new();
        store.reject_writes(true);

        let err = store.save_item(item(None), ExpectedVersion::Any).unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        store.reject_writes(false);
        assert!(store.load_items(&BTreeSet::new()).unwrap().is_empty());
    }
}
