//! Availability service: the write pipeline for items and products.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate (per-aggregate lock held from here on)
//!   ↓
//! 2. Handle the command (pure decision, produces events)
//!   ↓
//! 3. Apply + persist with an expected-version check
//!   ↓
//! 4. Route affected units to the cache updater (dependency index)
//!   ↓
//! 5. Publish the events on the bus
//! ```
//!
//! A mutation returns only after its cache updates are written, so readers
//! never see a ledger change without the matching availability. Publication
//! happens last; a publish failure is reported but the change stays committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, ProductId, Quantity, StockItemId,
};
use stockflow_events::{Event, EventBus, EventEnvelope};
use stockflow_inventory::{
    Availability, CorrectEntry, CreateItem, RecordEntry, SetUnlimitedStock, StockItem,
    StockItemCommand, StockItemEvent, WithdrawStock, resolve,
};
use stockflow_products::{
    AddAlternative, AddGroup, AttachRequirement, CreateProduct, DeleteProduct, DetachRequirement,
    Product, ProductCommand, RemoveAlternative, RemoveGroup, SetRequiredQuantity,
};

use crate::cache_updater::{AvailabilityRecord, CacheUpdater};
use crate::config::EngineConfig;
use crate::dependency_index::DependencyIndex;
use crate::error::ServiceError;
use crate::locks::LockTable;
use crate::store::AvailabilityStore;

pub const ITEM_AGGREGATE: &str = "inventory.item";
pub const PRODUCT_AGGREGATE: &str = "products.product";

/// What a mutation changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutationOutcome {
    /// Published envelopes, in emission order.
    pub events: Vec<EventEnvelope<JsonValue>>,
    /// Units whose cache was recomputed (or created/removed), sorted.
    pub affected_units: Vec<ProductId>,
}

impl MutationOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug)]
pub struct AvailabilityService<S, B> {
    store: Arc<S>,
    bus: B,
    index: DependencyIndex,
    updater: CacheUpdater<S>,
    item_locks: LockTable<StockItemId>,
    product_locks: LockTable<ProductId>,
}

impl<S, B> AvailabilityService<S, B>
where
    S: AvailabilityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// The dependency index starts empty; call [`Self::rebuild_index`] when
    /// the store already holds products.
    pub fn new(store: Arc<S>, bus: B, config: EngineConfig) -> Self {
        Self {
            updater: CacheUpdater::new(store.clone(), config),
            store,
            bus,
            index: DependencyIndex::new(),
            item_locks: LockTable::new(),
            product_locks: LockTable::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        self.updater.config()
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    pub fn updater(&self) -> &CacheUpdater<S> {
        &self.updater
    }

    // ---- stock items -------------------------------------------------------

    pub fn create_item(&self, command: CreateItem) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_item(StockItemCommand::CreateItem(command))
    }

    /// Record a deposit (or a negative consumption entry).
    pub fn record_entry(&self, command: RecordEntry) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_item(StockItemCommand::RecordEntry(command))
    }

    pub fn correct_entry(&self, command: CorrectEntry) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_item(StockItemCommand::CorrectEntry(command))
    }

    /// Withdraw stock, drawing buckets in the configured readiness order.
    pub fn withdraw_stock(&self, mut command: WithdrawStock) -> Result<MutationOutcome, ServiceError> {
        command.comparison = self.config().readiness_comparison;
        self.dispatch_item(StockItemCommand::WithdrawStock(command))
    }

    pub fn set_unlimited_stock(
        &self,
        command: SetUnlimitedStock,
    ) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_item(StockItemCommand::SetUnlimitedStock(command))
    }

    pub fn dispatch_item(&self, command: StockItemCommand) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_item_at(command, Utc::now())
    }

    #[instrument(skip_all, fields(item_id = %command.item_id()))]
    pub(crate) fn dispatch_item_at(
        &self,
        command: StockItemCommand,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, ServiceError> {
        let item_id = command.item_id();
        let key = self.item_locks.get(item_id);
        let _guard = key.lock();

        let mut item = self
            .store
            .load_item(item_id)?
            .unwrap_or_else(|| StockItem::empty(item_id));
        let base = item.version();

        let decided = item.handle(&command)?;
        if decided.is_empty() {
            return Ok(MutationOutcome::default());
        }
        let envelopes = envelopes(*item_id.as_uuid(), ITEM_AGGREGATE, base, &decided)?;

        for ev in &decided {
            item.apply(ev);
        }
        self.store.save_item(item, ExpectedVersion::Exact(base))?;

        let affected = if decided.iter().any(StockItemEvent::affects_availability) {
            self.index.dependents([item_id])
        } else {
            BTreeSet::new()
        };
        self.updater.recompute_many(affected.iter().copied(), now)?;

        self.publish(&envelopes)?;
        info!(
            events = envelopes.len(),
            affected_units = affected.len(),
            "stock item updated"
        );

        Ok(MutationOutcome {
            events: envelopes,
            affected_units: affected.into_iter().collect(),
        })
    }

    // ---- products ----------------------------------------------------------

    pub fn create_product(&self, command: CreateProduct) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::CreateProduct(command))
    }

    pub fn add_group(&self, command: AddGroup) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::AddGroup(command))
    }

    pub fn add_alternative(&self, command: AddAlternative) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::AddAlternative(command))
    }

    pub fn attach_requirement(
        &self,
        command: AttachRequirement,
    ) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::AttachRequirement(command))
    }

    pub fn detach_requirement(
        &self,
        command: DetachRequirement,
    ) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::DetachRequirement(command))
    }

    pub fn set_required_quantity(
        &self,
        command: SetRequiredQuantity,
    ) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::SetRequiredQuantity(command))
    }

    pub fn remove_alternative(
        &self,
        command: RemoveAlternative,
    ) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::RemoveAlternative(command))
    }

    pub fn remove_group(&self, command: RemoveGroup) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::RemoveGroup(command))
    }

    /// Delete a product; its cache record and index links go with it.
    pub fn delete_product(&self, command: DeleteProduct) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product(ProductCommand::DeleteProduct(command))
    }

    pub fn dispatch_product(&self, command: ProductCommand) -> Result<MutationOutcome, ServiceError> {
        self.dispatch_product_at(command, Utc::now())
    }

    #[instrument(skip_all, fields(unit_id = %command.product_id()))]
    fn dispatch_product_at(
        &self,
        command: ProductCommand,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, ServiceError> {
        if let Some(item_id) = command.referenced_item() {
            self.item(item_id)?;
        }

        let product_id = command.product_id();
        let key = self.product_locks.get(product_id);
        let _guard = key.lock();

        let mut product = self
            .store
            .load_product(product_id)?
            .unwrap_or_else(|| Product::empty(product_id));
        let base = product.version();

        let decided = product.handle(&command)?;
        if decided.is_empty() {
            return Ok(MutationOutcome::default());
        }
        let envelopes = envelopes(*product_id.as_uuid(), PRODUCT_AGGREGATE, base, &decided)?;

        for ev in &decided {
            product.apply(ev);
        }
        let live = product.is_live();
        let items = product.item_ids();
        self.store.save_product(product, ExpectedVersion::Exact(base))?;

        if live {
            self.index.reindex(product_id, items);
        } else {
            self.index.remove_unit(product_id);
        }
        match command {
            ProductCommand::CreateProduct(_) => {
                self.updater.initialize(product_id, now)?;
            }
            ProductCommand::DeleteProduct(_) => self.updater.remove(product_id)?,
            _ => {
                self.updater.recompute_at(product_id, now)?;
            }
        }

        self.publish(&envelopes)?;
        info!(events = envelopes.len(), "product updated");

        Ok(MutationOutcome {
            events: envelopes,
            affected_units: vec![product_id],
        })
    }

    // ---- reads -------------------------------------------------------------

    /// Cached availability of a unit.
    pub fn availability(&self, unit_id: ProductId) -> Result<AvailabilityRecord, ServiceError> {
        self.store
            .get_record(unit_id)?
            .ok_or_else(|| DomainError::UnitNotFound(unit_id).into())
    }

    pub fn item(&self, item_id: StockItemId) -> Result<StockItem, ServiceError> {
        match self.store.load_item(item_id)? {
            Some(item) if item.is_created() => Ok(item),
            _ => Err(DomainError::ItemNotFound(item_id).into()),
        }
    }

    pub fn product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        match self.store.load_product(product_id)? {
            Some(product) if product.is_live() => Ok(product),
            _ => Err(DomainError::UnitNotFound(product_id).into()),
        }
    }

    /// Resolve one item at one quantity, uncached.
    pub fn item_availability(
        &self,
        item_id: StockItemId,
        required: Quantity,
    ) -> Result<Availability, ServiceError> {
        let item = self.item(item_id)?;
        Ok(resolve(&item, required, &self.config().readiness_order(Utc::now())))
    }

    // ---- maintenance -------------------------------------------------------

    /// Rebuild the dependency index from stored products.
    pub fn rebuild_index(&self) -> Result<usize, ServiceError> {
        self.index.clear();
        let ids = self.store.product_ids()?;
        for product_id in &ids {
            if let Some(product) = self.store.load_product(*product_id)? {
                self.index.reindex(*product_id, product.item_ids());
            }
        }
        info!(units = ids.len(), "dependency index rebuilt");
        Ok(ids.len())
    }

    /// Rebuild the index, then recompute every live unit.
    pub fn recompute_all(&self) -> Result<Vec<AvailabilityRecord>, ServiceError> {
        self.rebuild_index()?;
        let ids = self.store.product_ids()?;
        self.updater.recompute_many(ids, Utc::now())
    }

    fn publish(&self, envelopes: &[EventEnvelope<JsonValue>]) -> Result<(), ServiceError> {
        for envelope in envelopes {
            self.bus
                .publish(envelope.clone())
                .map_err(|e| ServiceError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

fn envelopes<E>(
    aggregate_id: Uuid,
    aggregate_type: &str,
    base_version: u64,
    events: &[E],
) -> Result<Vec<EventEnvelope<JsonValue>>, ServiceError>
where
    E: Event + serde::Serialize,
{
    events
        .iter()
        .zip(base_version + 1..)
        .map(|(ev, seq)| {
            EventEnvelope::from_event(aggregate_id, aggregate_type, seq, ev).map_err(ServiceError::from)
        })
        .collect()
}
