//! Stock ledger domain module.
//!
//! Stock items own an append-only ledger of signed deposits, each optionally
//! annotated with when it becomes shippable. The resolver answers "can this
//! item supply N units, and how soon?" from that ledger. Pure domain logic:
//! no IO, no storage.

pub mod item;
pub mod ledger;
pub mod resolver;

pub use item::{
    ClearExpiredUnlimitedStock, CorrectEntry, CreateItem, EntryCorrected, EntryRecorded,
    ItemCreated, RecordEntry, SetUnlimitedStock, StockItem, StockItemCommand, StockItemEvent,
    StockWithdrawn, UnlimitedStockChanged, UnlimitedStockExpired, WithdrawStock,
};
pub use ledger::{LedgerEntry, ReadinessBucket, StockLevel};
pub use resolver::{Availability, resolve};
