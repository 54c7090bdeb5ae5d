//! Availability cache updater.
//!
//! Recomputes and persists the denormalized availability of a product. One
//! recomputation costs three storage round trips whatever the product's size:
//! load the product, batch-load every item it references, write the record.
//! Per-item resolutions are memoized for the duration of the pass.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use stockflow_core::{AlternativeId, DomainError, ProductId, Readiness};
use stockflow_inventory::Availability;
use stockflow_products::{AlternativeAvailability, MemoizedResolver, UnitEvaluation, evaluate_product};

use crate::config::EngineConfig;
use crate::error::ServiceError;
use crate::locks::LockTable;
use crate::store::AvailabilityStore;

/// Cached availability of one product, written as a single record.
///
/// `shipping_time` and `shipping_date` come from one readiness value and are
/// never both set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub product_id: ProductId,
    pub available: bool,
    pub shipping_time: Option<u32>,
    pub shipping_date: Option<DateTime<Utc>>,
    /// Alternatives of the soonest combination, one per required select group.
    pub selection: Vec<AlternativeId>,
    /// Per-option availability for every select group.
    pub alternatives: Vec<AlternativeAvailability>,
    /// The combination search ran out of budget; the result may not be the soonest.
    pub truncated: bool,
    pub computed_at: DateTime<Utc>,
}

impl AvailabilityRecord {
    /// Record of a freshly created product.
    pub fn unavailable(product_id: ProductId, computed_at: DateTime<Utc>) -> Self {
        Self::from_availability(product_id, Availability::unavailable(), computed_at)
    }

    pub fn from_evaluation(
        product_id: ProductId,
        evaluation: UnitEvaluation,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            selection: evaluation.selection,
            alternatives: evaluation.alternatives,
            truncated: evaluation.truncated,
            ..Self::from_availability(product_id, evaluation.availability, computed_at)
        }
    }

    fn from_availability(
        product_id: ProductId,
        availability: Availability,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            available: availability.is_available(),
            shipping_time: availability.shipping_time(),
            shipping_date: availability.shipping_date(),
            selection: Vec::new(),
            alternatives: Vec::new(),
            truncated: false,
            computed_at,
        }
    }

    pub fn availability(&self) -> Availability {
        if !self.available {
            return Availability::unavailable();
        }
        match (self.shipping_time, self.shipping_date) {
            (_, Some(date)) => Availability::available(Readiness::Date(date)),
            (Some(days), None) => Availability::available(Readiness::Days(days)),
            (None, None) => Availability::available(Readiness::Immediate),
        }
    }
}

#[derive(Debug)]
pub struct CacheUpdater<S> {
    store: Arc<S>,
    config: EngineConfig,
    locks: LockTable<ProductId>,
}

impl<S: AvailabilityStore> CacheUpdater<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: LockTable::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recompute(&self, unit_id: ProductId) -> Result<AvailabilityRecord, ServiceError> {
        self.recompute_at(unit_id, Utc::now())
    }

    /// Recompute `unit_id` as of `now` and persist the record.
    ///
    /// Serialized per unit: the load and the write happen under the unit's
    /// lock, so a later recomputation never writes older state.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub fn recompute_at(
        &self,
        unit_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityRecord, ServiceError> {
        let key = self.locks.get(unit_id);
        let _guard = key.lock();

        let product = match self.store.load_product(unit_id)? {
            Some(p) if p.is_live() => p,
            _ => return Err(DomainError::UnitNotFound(unit_id).into()),
        };

        let items = self.store.load_items(&product.item_ids())?;
        let resolver = MemoizedResolver::new(&items, self.config.readiness_order(now));
        let evaluation = evaluate_product(&product, &resolver, &self.config.search_limits());

        debug!(
            available = evaluation.is_available(),
            items = items.len(),
            resolutions = resolver.resolutions(),
            evaluated = evaluation.evaluated,
            truncated = evaluation.truncated,
            "unit recomputed"
        );

        let record = AvailabilityRecord::from_evaluation(unit_id, evaluation, now);
        self.store.put_record(record.clone())?;
        Ok(record)
    }

    /// Recompute several units, each once, in id order.
    ///
    /// Units deleted in the meantime are skipped.
    pub fn recompute_many<I>(
        &self,
        unit_ids: I,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityRecord>, ServiceError>
    where
        I: IntoIterator<Item = ProductId>,
    {
        let unique: BTreeSet<ProductId> = unit_ids.into_iter().collect();
        let mut records = Vec::with_capacity(unique.len());
        for unit_id in unique {
            match self.recompute_at(unit_id, now) {
                Ok(record) => records.push(record),
                Err(e) if e.is_not_found() => {
                    debug!(unit_id = %unit_id, "skipping recomputation of missing unit");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Write the empty record of a newly created unit.
    pub fn initialize(
        &self,
        unit_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityRecord, ServiceError> {
        let key = self.locks.get(unit_id);
        let _guard = key.lock();
        let record = AvailabilityRecord::unavailable(unit_id, now);
        self.store.put_record(record.clone())?;
        Ok(record)
    }

    /// Drop the record of a deleted unit.
    pub fn remove(&self, unit_id: ProductId) -> Result<(), ServiceError> {
        let key = self.locks.get(unit_id);
        let _guard = key.lock();
        self.store.remove_record(unit_id)?;
        Ok(())
    }
}
