//! Infrastructure layer: persistence ports, the availability cache updater,
//! the write pipeline and the expiry sweep.

pub mod cache_updater;
pub mod config;
pub mod dependency_index;
pub mod error;
pub mod jobs;
pub mod locks;
pub mod service;
pub mod store;


pub use cache_updater::{AvailabilityRecord, CacheUpdater};
pub use config::{ConfigError, EngineConfig};
pub use dependency_index::DependencyIndex;
pub use error::{ServiceError, StoreError};
pub use jobs::{SweepHandle, SweepReport, SweepScheduler, SweepStats};
pub use service::{AvailabilityService, MutationOutcome};
pub use store::{
    AvailabilityCacheStore, AvailabilityStore, InMemoryStore, ProductStore, StockItemStore,
};
