use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::entity;
use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, LedgerEntryId, Quantity, Readiness,
    ReadinessComparison, ReadinessOrder, StockItemId, UnlimitedStock,
};
use stockflow_events::Event;

use crate::ledger::{LedgerEntry, ReadinessBucket, StockLevel, allocation_entry_id, buckets};

/// Aggregate root: StockItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    sku: String,
    name: String,
    entries: Vec<LedgerEntry>,
    unlimited: Option<UnlimitedStock>,
    next_sequence: u64,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            sku: String::new(),
            name: String::new(),
            entries: Vec::new(),
            unlimited: None,
            next_sequence: 1,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entry(&self, entry_id: &LedgerEntryId) -> Option<&LedgerEntry> {
        entity::find(&self.entries, entry_id)
    }

    pub fn unlimited(&self) -> Option<UnlimitedStock> {
        self.unlimited
    }

    /// Running sum of all entries (unlimited items report `Unlimited`).
    pub fn current_quantity(&self) -> StockLevel {
        if self.unlimited.is_some() {
            return StockLevel::Unlimited;
        }
        StockLevel::Finite(self.entries.iter().map(|e| &e.quantity).sum())
    }

    /// Net quantity per readiness in fulfilment order.
    pub fn quantity_by_readiness(&self, order: &ReadinessOrder) -> Vec<ReadinessBucket> {
        buckets(&self.entries, order)
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub item_id: StockItemId,
    pub sku: String,
    pub name: String,
    pub unlimited: Option<UnlimitedStock>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordEntry (a deposit; negative for consumption).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub item_id: StockItemId,
    pub entry_id: LedgerEntryId,
    pub quantity: Quantity,
    pub shipping_time: Option<u32>,
    pub shipping_date: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectEntry (administrative correction of an existing entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectEntry {
    pub item_id: StockItemId,
    pub entry_id: LedgerEntryId,
    pub quantity: Quantity,
    pub shipping_time: Option<u32>,
    pub shipping_date: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawStock (order fulfilment).
///
/// Draws from the ledger in fulfilment order; one negative entry is written
/// per readiness bucket touched, ids derived from `withdrawal_id`. Buckets are
/// ordered with `comparison`, day-counts anchored at `occurred_at`. An
/// unlimited item books a single immediate entry instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStock {
    pub item_id: StockItemId,
    pub withdrawal_id: LedgerEntryId,
    pub quantity: Quantity,
    #[serde(default)]
    pub comparison: ReadinessComparison,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetUnlimitedStock (`None` switches the override off).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetUnlimitedStock {
    pub item_id: StockItemId,
    pub unlimited: Option<UnlimitedStock>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClearExpiredUnlimitedStock (issued by the expiry sweep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearExpiredUnlimitedStock {
    pub item_id: StockItemId,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemCommand {
    CreateItem(CreateItem),
    RecordEntry(RecordEntry),
    CorrectEntry(CorrectEntry),
    WithdrawStock(WithdrawStock),
    SetUnlimitedStock(SetUnlimitedStock),
    ClearExpiredUnlimitedStock(ClearExpiredUnlimitedStock),
}

impl StockItemCommand {
    pub fn item_id(&self) -> StockItemId {
        match self {
            StockItemCommand::CreateItem(c) => c.item_id,
            StockItemCommand::RecordEntry(c) => c.item_id,
            StockItemCommand::CorrectEntry(c) => c.item_id,
            StockItemCommand::WithdrawStock(c) => c.item_id,
            StockItemCommand::SetUnlimitedStock(c) => c.item_id,
            StockItemCommand::ClearExpiredUnlimitedStock(c) => c.item_id,
        }
    }
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub item_id: StockItemId,
    pub sku: String,
    pub name: String,
    pub unlimited: Option<UnlimitedStock>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EntryRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecorded {
    pub item_id: StockItemId,
    pub entry_id: LedgerEntryId,
    pub sequence: u64,
    pub quantity: Quantity,
    pub readiness: Readiness,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EntryCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCorrected {
    pub item_id: StockItemId,
    pub entry_id: LedgerEntryId,
    pub quantity: Quantity,
    pub readiness: Readiness,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockWithdrawn (the negative entries written for one withdrawal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWithdrawn {
    pub item_id: StockItemId,
    pub withdrawal_id: LedgerEntryId,
    pub entries: Vec<LedgerEntry>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnlimitedStockChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlimitedStockChanged {
    pub item_id: StockItemId,
    pub unlimited: Option<UnlimitedStock>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnlimitedStockExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlimitedStockExpired {
    pub item_id: StockItemId,
    pub expired_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemEvent {
    ItemCreated(ItemCreated),
    EntryRecorded(EntryRecorded),
    EntryCorrected(EntryCorrected),
    StockWithdrawn(StockWithdrawn),
    UnlimitedStockChanged(UnlimitedStockChanged),
    UnlimitedStockExpired(UnlimitedStockExpired),
}

impl StockItemEvent {
    /// Whether applying this event can change any item resolution.
    pub fn affects_availability(&self) -> bool {
        !matches!(self, StockItemEvent::ItemCreated(_))
    }
}

impl Event for StockItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockItemEvent::ItemCreated(_) => "inventory.item.created",
            StockItemEvent::EntryRecorded(_) => "inventory.item.entry_recorded",
            StockItemEvent::EntryCorrected(_) => "inventory.item.entry_corrected",
            StockItemEvent::StockWithdrawn(_) => "inventory.item.stock_withdrawn",
            StockItemEvent::UnlimitedStockChanged(_) => "inventory.item.unlimited_stock_changed",
            StockItemEvent::UnlimitedStockExpired(_) => "inventory.item.unlimited_stock_expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockItemEvent::ItemCreated(e) => e.occurred_at,
            StockItemEvent::EntryRecorded(e) => e.occurred_at,
            StockItemEvent::EntryCorrected(e) => e.occurred_at,
            StockItemEvent::StockWithdrawn(e) => e.occurred_at,
            StockItemEvent::UnlimitedStockChanged(e) => e.occurred_at,
            StockItemEvent::UnlimitedStockExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockItemCommand;
    type Event = StockItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockItemEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.unlimited = e.unlimited;
                self.created = true;
            }
            StockItemEvent::EntryRecorded(e) => {
                self.entries.push(LedgerEntry {
                    id: e.entry_id,
                    sequence: e.sequence,
                    quantity: e.quantity,
                    readiness: e.readiness,
                    recorded_at: e.occurred_at,
                });
                self.next_sequence = self.next_sequence.max(e.sequence + 1);
            }
            StockItemEvent::EntryCorrected(e) => {
                if let Some(entry) = entity::find_mut(&mut self.entries, &e.entry_id) {
                    entry.quantity = e.quantity;
                    entry.readiness = e.readiness;
                }
            }
            StockItemEvent::StockWithdrawn(e) => {
                for entry in &e.entries {
                    self.next_sequence = self.next_sequence.max(entry.sequence + 1);
                    self.entries.push(entry.clone());
                }
            }
            StockItemEvent::UnlimitedStockChanged(e) => {
                self.unlimited = e.unlimited;
            }
            StockItemEvent::UnlimitedStockExpired(_) => {
                self.unlimited = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockItemCommand::CreateItem(cmd) => self.handle_create(cmd),
            StockItemCommand::RecordEntry(cmd) => self.handle_record(cmd),
            StockItemCommand::CorrectEntry(cmd) => self.handle_correct(cmd),
            StockItemCommand::WithdrawStock(cmd) => self.handle_withdraw(cmd),
            StockItemCommand::SetUnlimitedStock(cmd) => self.handle_set_unlimited(cmd),
            StockItemCommand::ClearExpiredUnlimitedStock(cmd) => self.handle_clear_expired(cmd),
        }
    }
}

impl StockItem {
    fn ensure_exists(&self, item_id: StockItemId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::ItemNotFound(item_id));
        }
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![StockItemEvent::ItemCreated(ItemCreated {
            item_id: cmd.item_id,
            sku: cmd.sku.clone(),
            name: cmd.name.clone(),
            unlimited: cmd.unlimited,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordEntry) -> Result<Vec<StockItemEvent>, DomainError> {
        // Timing is validated first so a malformed entry never reaches storage.
        let readiness = Readiness::from_fields(cmd.shipping_time, cmd.shipping_date)?;
        self.ensure_exists(cmd.item_id)?;

        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("quantity cannot be zero"));
        }
        if self.entry(&cmd.entry_id).is_some() {
            return Err(DomainError::conflict("ledger entry already exists"));
        }

        Ok(vec![StockItemEvent::EntryRecorded(EntryRecorded {
            item_id: cmd.item_id,
            entry_id: cmd.entry_id,
            sequence: self.next_sequence,
            quantity: cmd.quantity,
            readiness,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_correct(&self, cmd: &CorrectEntry) -> Result<Vec<StockItemEvent>, DomainError> {
        let readiness = Readiness::from_fields(cmd.shipping_time, cmd.shipping_date)?;
        self.ensure_exists(cmd.item_id)?;

        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("quantity cannot be zero"));
        }
        let Some(existing) = self.entry(&cmd.entry_id) else {
            return Err(DomainError::validation(format!("unknown ledger entry {}", cmd.entry_id)));
        };
        if existing.quantity == cmd.quantity && existing.readiness == readiness {
            return Ok(vec![]);
        }

        Ok(vec![StockItemEvent::EntryCorrected(EntryCorrected {
            item_id: cmd.item_id,
            entry_id: cmd.entry_id,
            quantity: cmd.quantity,
            readiness,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawStock) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_exists(cmd.item_id)?;

        if !cmd.quantity.is_positive() {
            return Err(DomainError::validation("withdrawal quantity must be positive"));
        }

        if self.unlimited.is_some() {
            return Ok(vec![self.withdrawn(cmd, vec![(Readiness::Immediate, cmd.quantity)])]);
        }

        let available: Quantity = self.entries.iter().map(|e| &e.quantity).sum();
        if cmd.quantity > available {
            return Err(DomainError::invariant(format!(
                "insufficient stock: requested {}, on hand {available}",
                cmd.quantity
            )));
        }

        let order = ReadinessOrder::new(cmd.comparison, cmd.occurred_at);
        let mut remaining = cmd.quantity;
        let mut allocations: Vec<(Readiness, Quantity)> = Vec::new();
        for bucket in self.quantity_by_readiness(&order) {
            if !remaining.is_positive() {
                break;
            }
            if !bucket.quantity.is_positive() {
                continue;
            }
            let take = bucket.quantity.min(remaining);
            allocations.push((bucket.readiness, take));
            remaining -= take;
        }
        if remaining.is_positive() {
            return Err(DomainError::invariant(format!(
                "insufficient stock: missing {remaining} units"
            )));
        }

        Ok(vec![self.withdrawn(cmd, allocations)])
    }

    fn withdrawn(
        &self,
        cmd: &WithdrawStock,
        allocations: Vec<(Readiness, Quantity)>,
    ) -> StockItemEvent {
        let entries = allocations
            .into_iter()
            .enumerate()
            .map(|(index, (readiness, quantity))| LedgerEntry {
                id: allocation_entry_id(cmd.withdrawal_id, index),
                sequence: self.next_sequence + index as u64,
                quantity: -quantity,
                readiness,
                recorded_at: cmd.occurred_at,
            })
            .collect();

        StockItemEvent::StockWithdrawn(StockWithdrawn {
            item_id: cmd.item_id,
            withdrawal_id: cmd.withdrawal_id,
            entries,
            occurred_at: cmd.occurred_at,
        })
    }

    fn handle_set_unlimited(&self, cmd: &SetUnlimitedStock) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_exists(cmd.item_id)?;

        if self.unlimited == cmd.unlimited {
            return Ok(vec![]);
        }

        Ok(vec![StockItemEvent::UnlimitedStockChanged(UnlimitedStockChanged {
            item_id: cmd.item_id,
            unlimited: cmd.unlimited,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear_expired(
        &self,
        cmd: &ClearExpiredUnlimitedStock,
    ) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_exists(cmd.item_id)?;

        match self.unlimited {
            Some(UnlimitedStock::ShippingDate(date)) if date < cmd.now => {
                Ok(vec![StockItemEvent::UnlimitedStockExpired(UnlimitedStockExpired {
                    item_id: cmd.item_id,
                    expired_date: date,
                    occurred_at: cmd.now,
                })])
            }
            // Idempotent: nothing expired, nothing to do.
            _ => Ok(vec![]),
        }
    }
}
