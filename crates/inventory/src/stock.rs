use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, WarehouseId};
use stockflow_events::Event;

/// Natural key of a stock record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }

    pub fn record_id(&self) -> StockRecordId {
        StockRecordId::for_key(*self)
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// Stream id of a stock record, derived from its key so that a record exists
/// implicitly for every (product, warehouse) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecordId(pub AggregateId);

impl StockRecordId {
    pub fn for_key(key: StockKey) -> Self {
        Self(AggregateId::derived(
            "stock",
            &[key.product_id.as_uuid(), key.warehouse_id.as_uuid()],
        ))
    }
}

impl core::fmt::Display for StockRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: on-hand and reserved counters for one (product, warehouse).
///
/// Invariant: `reserved <= on_hand`. Both counters are unsigned, so neither can
/// go negative; every command that would break the invariant is rejected without
/// emitting events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecord {
    id: StockRecordId,
    key: StockKey,
    on_hand: u64,
    reserved: u64,
    version: u64,
}

impl StockRecord {
    /// A record with zero counters; stock streams need no creation event.
    pub fn empty(key: StockKey) -> Self {
        Self {
            id: key.record_id(),
            key,
            on_hand: 0,
            reserved: 0,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn on_hand(&self) -> u64 {
        self.on_hand
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn available(&self) -> u64 {
        self.on_hand - self.reserved
    }
}

impl AggregateRoot for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Quantity movement against one stock key. Payload of every ledger command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub key: StockKey,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(key: StockKey, quantity: u64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    /// Goods arrived: on-hand grows.
    Receive(StockMovement),
    /// Hold stock for an order; fails when `available < quantity`.
    Reserve(StockMovement),
    /// Drop a hold. Floored at zero: releasing more than is reserved releases what is there.
    Release(StockMovement),
    /// Goods left the building: on-hand and reserved shrink together.
    Consume(StockMovement),
    /// Undo of `Consume`, used only by compensation.
    Restore(StockMovement),
    /// Undo of `Receive`, used only by compensation.
    ReverseReceipt(StockMovement),
}

/// Event: StockReleased. Records both what was asked and what was actually released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub key: StockKey,
    pub requested: u64,
    pub released: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockReceived(StockMovement),
    StockReserved(StockMovement),
    StockReleased(StockReleased),
    StockConsumed(StockMovement),
    StockRestored(StockMovement),
    ReceiptReversed(StockMovement),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockReceived(_) => "inventory.stock.received",
            StockEvent::StockReserved(_) => "inventory.stock.reserved",
            StockEvent::StockReleased(_) => "inventory.stock.released",
            StockEvent::StockConsumed(_) => "inventory.stock.consumed",
            StockEvent::StockRestored(_) => "inventory.stock.restored",
            StockEvent::ReceiptReversed(_) => "inventory.stock.receipt_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockReleased(e) => e.occurred_at,
            StockEvent::StockReceived(e)
            | StockEvent::StockReserved(e)
            | StockEvent::StockConsumed(e)
            | StockEvent::StockRestored(e)
            | StockEvent::ReceiptReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockRecord {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockReceived(e) => self.on_hand += e.quantity,
            StockEvent::StockReserved(e) => self.reserved += e.quantity,
            StockEvent::StockReleased(e) => self.reserved -= e.released,
            StockEvent::StockConsumed(e) => {
                self.on_hand -= e.quantity;
                self.reserved -= e.quantity;
            }
            StockEvent::StockRestored(e) => {
                self.on_hand += e.quantity;
                self.reserved += e.quantity;
            }
            StockEvent::ReceiptReversed(e) => self.on_hand -= e.quantity,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Receive(m) => self.handle_receive(m),
            StockCommand::Reserve(m) => self.handle_reserve(m),
            StockCommand::Release(m) => self.handle_release(m),
            StockCommand::Consume(m) => self.handle_consume(m),
            StockCommand::Restore(m) => self.handle_restore(m),
            StockCommand::ReverseReceipt(m) => self.handle_reverse_receipt(m),
        }
    }
}

impl StockRecord {
    fn ensure_movement(&self, m: &StockMovement) -> Result<(), DomainError> {
        if m.key != self.key {
            return Err(DomainError::invariant("stock key mismatch"));
        }
        if m.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_receive(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        if self.on_hand.checked_add(m.quantity).is_none() {
            return Err(DomainError::validation("on-hand quantity overflow"));
        }
        Ok(vec![StockEvent::StockReceived(m.clone())])
    }

    fn handle_reserve(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        if self.available() < m.quantity {
            return Err(DomainError::insufficient_stock(format!(
                "{}: requested {}, available {}",
                self.key,
                m.quantity,
                self.available()
            )));
        }
        Ok(vec![StockEvent::StockReserved(m.clone())])
    }

    fn handle_release(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        let released = m.quantity.min(self.reserved);
        if released == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![StockEvent::StockReleased(StockReleased {
            key: m.key,
            requested: m.quantity,
            released,
            occurred_at: m.occurred_at,
        })])
    }

    fn handle_consume(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        if self.reserved < m.quantity {
            return Err(DomainError::invariant(format!(
                "{}: cannot consume {} with only {} reserved",
                self.key, m.quantity, self.reserved
            )));
        }
        Ok(vec![StockEvent::StockConsumed(m.clone())])
    }

    fn handle_restore(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        Ok(vec![StockEvent::StockRestored(m.clone())])
    }

    fn handle_reverse_receipt(&self, m: &StockMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_movement(m)?;
        if self.available() < m.quantity {
            return Err(DomainError::invariant(format!(
                "{}: reversing receipt of {} would leave on-hand below reserved",
                self.key, m.quantity
            )));
        }
        Ok(vec![StockEvent::ReceiptReversed(m.clone())])
    }
}
