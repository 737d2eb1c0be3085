//! Inventory Ledger service: the only writer of stock counters.
//!
//! Each (product, warehouse) key is one `StockRecord` stream. Every movement is
//! load -> decide -> append at the loaded version, retried with backoff while
//! another writer holds the key, so counters stay consistent without a global
//! lock and writers on different keys never wait on each other.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use stockflow_core::{ProductId, WarehouseId};
use stockflow_inventory::{StockCommand, StockEvent, StockKey, StockMovement, StockRecord};

use crate::command_dispatcher::{DispatchError, Dispatched, RetryPolicy};
use crate::Dispatcher;

pub const STOCK_AGGREGATE_TYPE: &str = "inventory.stock";

/// Counters of one key after a movement (or as read).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub qty_on_hand: u64,
    pub qty_reserved: u64,
    pub available: u64,
}

impl From<&StockRecord> for StockLevel {
    fn from(record: &StockRecord) -> Self {
        let key = record.key();
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            qty_on_hand: record.on_hand(),
            qty_reserved: record.reserved(),
            available: record.available(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryLedger {
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
}

impl InventoryLedger {
    pub fn new(dispatcher: Arc<Dispatcher>, retry: RetryPolicy) -> Self {
        Self { dispatcher, retry }
    }

    fn run(&self, command: StockCommand) -> Result<Dispatched<StockRecord>, DispatchError> {
        let key = movement_key(&command);
        self.dispatcher.dispatch_with_retry(
            self.retry,
            key.record_id().0,
            STOCK_AGGREGATE_TYPE,
            &command,
            || StockRecord::empty(key),
        )
    }

    fn movement(key: StockKey, quantity: u64) -> StockMovement {
        StockMovement::new(key, quantity, Utc::now())
    }

    /// Hold `quantity` for an order. `InsufficientStock` leaves the key untouched.
    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn reserve(&self, key: StockKey, quantity: u64) -> Result<StockLevel, DispatchError> {
        let out = self.run(StockCommand::Reserve(Self::movement(key, quantity)))?;
        let level = StockLevel::from(&out.aggregate);
        info!(
            key = %key,
            quantity,
            on_hand = level.qty_on_hand,
            reserved = level.qty_reserved,
            "stock reserved"
        );
        Ok(level)
    }

    /// Drop up to `quantity` of the hold; returns the amount actually released.
    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn release(&self, key: StockKey, quantity: u64) -> Result<u64, DispatchError> {
        let out = self.run(StockCommand::Release(Self::movement(key, quantity)))?;
        let released = out
            .events
            .iter()
            .map(|e| match e {
                StockEvent::StockReleased(r) => r.released,
                _ => 0,
            })
            .sum::<u64>();
        if released < quantity {
            debug!(key = %key, requested = quantity, released, "release floored at zero");
        }
        info!(
            key = %key,
            released,
            reserved = out.aggregate.reserved(),
            "stock released"
        );
        Ok(released)
    }

    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn receive(&self, key: StockKey, quantity: u64) -> Result<StockLevel, DispatchError> {
        let out = self.run(StockCommand::Receive(Self::movement(key, quantity)))?;
        let level = StockLevel::from(&out.aggregate);
        info!(key = %key, quantity, on_hand = level.qty_on_hand, "stock received");
        Ok(level)
    }

    /// Ship reserved goods: on-hand and reserved drop together.
    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn consume(&self, key: StockKey, quantity: u64) -> Result<StockLevel, DispatchError> {
        let out = self.run(StockCommand::Consume(Self::movement(key, quantity)))?;
        let level = StockLevel::from(&out.aggregate);
        info!(
            key = %key,
            quantity,
            on_hand = level.qty_on_hand,
            reserved = level.qty_reserved,
            "stock consumed"
        );
        Ok(level)
    }

    /// Compensation for `consume`.
    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn restore(&self, key: StockKey, quantity: u64) -> Result<StockLevel, DispatchError> {
        let out = self.run(StockCommand::Restore(Self::movement(key, quantity)))?;
        info!(key = %key, quantity, "consumption restored");
        Ok(StockLevel::from(&out.aggregate))
    }

    /// Compensation for `receive`.
    #[instrument(skip(self, key), fields(key = %key), err)]
    pub fn reverse_receipt(&self, key: StockKey, quantity: u64) -> Result<StockLevel, DispatchError> {
        let out = self.run(StockCommand::ReverseReceipt(Self::movement(key, quantity)))?;
        info!(key = %key, quantity, "receipt reversed");
        Ok(StockLevel::from(&out.aggregate))
    }

    /// Current counters; a key that never moved reads as all zeros.
    pub fn level(&self, key: StockKey) -> Result<StockLevel, DispatchError> {
        let record = self
            .dispatcher
            .load(key.record_id().0, || StockRecord::empty(key))?;
        Ok(StockLevel::from(&record))
    }

    pub fn available(&self, key: StockKey) -> Result<u64, DispatchError> {
        Ok(self.level(key)?.available)
    }

    /// Available quantity of `product_id` summed over `warehouses`.
    pub fn availability(
        &self,
        product_id: ProductId,
        warehouses: &[WarehouseId],
    ) -> Result<u64, DispatchError> {
        warehouses.iter().try_fold(0u64, |total, w| {
            Ok(total.saturating_add(self.available(StockKey::new(product_id, *w))?))
        })
    }
}

fn movement_key(command: &StockCommand) -> StockKey {
    match command {
        StockCommand::Receive(m)
        | StockCommand::Reserve(m)
        | StockCommand::Release(m)
        | StockCommand::Consume(m)
        | StockCommand::Restore(m)
        | StockCommand::ReverseReceipt(m) => m.key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dispatcher;

    fn ledger() -> InventoryLedger {
        InventoryLedger::new(dispatcher(), RetryPolicy::default())
    }

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new())
    }

    #[test]
    fn reserve_then_consume_moves_both_counters() {
        let ledger = ledger();
        let k = key();
        ledger.receive(k, 10).unwrap();
        ledger.reserve(k, 4).unwrap();

        let level = ledger.consume(k, 3).unwrap();
        assert_eq!((level.qty_on_hand, level.qty_reserved, level.available), (7, 1, 6));
    }

    #[test]
    fn insufficient_stock_changes_nothing() {
        let ledger = ledger();
        let k = key();
        ledger.receive(k, 4).unwrap();

        let err = ledger.reserve(k, 10).unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientStock(_)));
        assert_eq!(ledger.available(k).unwrap(), 4);
    }

    #[test]
    fn release_reports_the_floored_amount() {
        let ledger = ledger();
        let k = key();
        ledger.receive(k, 5).unwrap();
        ledger.reserve(k, 2).unwrap();

        assert_eq!(ledger.release(k, 9).unwrap(), 2);
        assert_eq!(ledger.release(k, 1).unwrap(), 0);
        assert_eq!(ledger.level(k).unwrap().qty_reserved, 0);
    }

    #[test]
    fn consume_beyond_reserved_is_an_invariant_violation() {
        let ledger = ledger();
        let k = key();
        ledger.receive(k, 5).unwrap();
        let err = ledger.consume(k, 1).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));
    }

    #[test]
    fn zero_quantity_receipt_is_rejected() {
        let err = ledger().receive(key(), 0).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn availability_sums_the_requested_warehouses() {
        let ledger = ledger();
        let p = ProductId::new();
        let (a, b, c) = (WarehouseId::new(), WarehouseId::new(), WarehouseId::new());
        ledger.receive(StockKey::new(p, a), 20).unwrap();
        ledger.receive(StockKey::new(p, b), 5).unwrap();
        ledger.reserve(StockKey::new(p, b), 2).unwrap();

        assert_eq!(ledger.availability(p, &[a, b, c]).unwrap(), 23);
        assert_eq!(ledger.availability(p, &[c]).unwrap(), 0);
    }

    #[test]
    fn compensation_primitives_invert_their_movements() {
        let ledger = ledger();
        let k = key();
        ledger.receive(k, 6).unwrap();
        ledger.reserve(k, 6).unwrap();
        ledger.consume(k, 6).unwrap();
        let restored = ledger.restore(k, 6).unwrap();
        assert_eq!((restored.qty_on_hand, restored.qty_reserved), (6, 6));

        ledger.release(k, 6).unwrap();
        let reversed = ledger.reverse_receipt(k, 6).unwrap();
        assert_eq!(reversed.qty_on_hand, 0);
    }
}
