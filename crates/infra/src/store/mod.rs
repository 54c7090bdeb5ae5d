//! Persistence ports for items, products and the availability cache.
//!
//! Every trait method is one storage round trip. Batch loads exist so that a
//! recomputation costs a constant number of round trips whatever the number of
//! options a product has.

pub mod in_memory;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockflow_core::{ExpectedVersion, ProductId, StockItemId};
use stockflow_inventory::StockItem;
use stockflow_products::Product;

use crate::cache_updater::AvailabilityRecord;
use crate::error::StoreError;

pub use in_memory::InMemoryStore;

pub trait StockItemStore: Send + Sync {
    fn load_item(&self, item_id: StockItemId) -> Result<Option<StockItem>, StoreError>;

    /// Load many items at once. Unknown ids are absent from the map.
    fn load_items(
        &self,
        item_ids: &BTreeSet<StockItemId>,
    ) -> Result<HashMap<StockItemId, StockItem>, StoreError>;

    /// Persist the item state, checking the version it was loaded at.
    fn save_item(&self, item: StockItem, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Items whose unlimited-stock date override lies strictly before `now`.
    fn items_with_unlimited_date_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockItemId>, StoreError>;
}

pub trait ProductStore: Send + Sync {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    fn save_product(&self, product: Product, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Ids of every live product.
    fn product_ids(&self) -> Result<Vec<ProductId>, StoreError>;
}

/// Denormalized availability per product. Records are replaced whole.
pub trait AvailabilityCacheStore: Send + Sync {
    fn get_record(&self, product_id: ProductId) -> Result<Option<AvailabilityRecord>, StoreError>;

    fn put_record(&self, record: AvailabilityRecord) -> Result<(), StoreError>;

    fn remove_record(&self, product_id: ProductId) -> Result<(), StoreError>;
}

/// Everything the availability service needs from one backend.
pub trait AvailabilityStore: StockItemStore + ProductStore + AvailabilityCacheStore {}

impl<S> AvailabilityStore for S where S: StockItemStore + ProductStore + AvailabilityCacheStore {}

impl<S> StockItemStore for Arc<S>
where
    S: StockItemStore + ?Sized,
{
    fn load_item(&self, item_id: StockItemId) -> Result<Option<StockItem>, StoreError> {
        (**self).load_item(item_id)
    }

    fn load_items(
        &self,
        item_ids: &BTreeSet<StockItemId>,
    ) -> Result<HashMap<StockItemId, StockItem>, StoreError> {
        (**self).load_items(item_ids)
    }

    fn save_item(&self, item: StockItem, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save_item(item, expected)
    }

    fn items_with_unlimited_date_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockItemId>, StoreError> {
        (**self).items_with_unlimited_date_before(now)
    }
}

impl<S> ProductStore for Arc<S>
where
    S: ProductStore + ?Sized,
{
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).load_product(product_id)
    }

    fn save_product(&self, product: Product, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save_product(product, expected)
    }

    fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
        (**self).product_ids()
    }
}

impl<S> AvailabilityCacheStore for Arc<S>
where
    S: AvailabilityCacheStore + ?Sized,
{
    fn get_record(&self, product_id: ProductId) -> Result<Option<AvailabilityRecord>, StoreError> {
        (**self).get_record(product_id)
    }

    fn put_record(&self, record: AvailabilityRecord) -> Result<(), StoreError> {
        (**self).put_record(record)
    }

    fn remove_record(&self, product_id: ProductId) -> Result<(), StoreError> {
        (**self).remove_record(product_id)
    }
}
